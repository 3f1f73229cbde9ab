use std::collections::HashSet;

use partyqueue::{
    DuplicatePolicy, PollContext, Priority, PromoteOutcome, QueueEntry, QueueError,
    QueueScheduler, QueueSettings, Readiness, Submitter,
};
use partysource::Track;

fn track(id: &str) -> Track {
    Track {
        id: id.into(),
        title: format!("Song {id}"),
        artists: vec!["Band".into()],
        duration_ms: 200_000,
        platform: "demo".into(),
        cover_url: None,
    }
}

fn ready(id: &str, user: &str) -> QueueEntry {
    QueueEntry::new(track(id), Submitter::new(user, user.to_uppercase()), Readiness::Ready)
}

fn no_one() -> HashSet<String> {
    HashSet::new()
}

#[test]
fn shuffle_off_serves_physical_order() {
    let queue = QueueScheduler::new(QueueSettings::default());
    queue.add(ready("x", "u")).unwrap();
    queue.add(ready("y", "u")).unwrap();

    let online = no_one();
    let ctx = PollContext::new(false, &online, true);
    assert_eq!(queue.poll_next(&ctx).unwrap().track.id, "x");
    assert_eq!(queue.poll_next(&ctx).unwrap().track.id, "y");
    assert!(queue.is_empty());
}

#[test]
fn shuffle_on_alternates_submitters() {
    let queue = QueueScheduler::new(QueueSettings::default());
    queue.add(ready("a1", "u1")).unwrap();
    queue.add(ready("a2", "u1")).unwrap();
    queue.add(ready("b1", "u2")).unwrap();
    queue.add(ready("b2", "u2")).unwrap();

    let online: HashSet<String> = ["u1", "u2"].iter().map(|s| s.to_string()).collect();
    let ctx = PollContext::new(true, &online, true);
    let order: Vec<String> = (0..4)
        .map(|_| queue.poll_next(&ctx).unwrap().submitter.id)
        .collect();
    assert_eq!(order, vec!["u1", "u2", "u1", "u2"]);
}

#[test]
fn round_robin_visits_every_submitter_once_per_cycle() {
    let queue = QueueScheduler::new(QueueSettings {
        duplicate_policy: DuplicatePolicy::Allow,
        ..QueueSettings::default()
    });
    let users = ["carol", "alice", "dave", "bob"];
    for round in 0..3 {
        for user in users {
            queue.add(ready(&format!("{user}-{round}"), user)).unwrap();
        }
    }

    let online: HashSet<String> = users.iter().map(|s| s.to_string()).collect();
    let ctx = PollContext::new(true, &online, true);
    for _ in 0..3 {
        let mut cycle: Vec<String> = (0..users.len())
            .map(|_| queue.poll_next(&ctx).unwrap().submitter.id)
            .collect();
        cycle.sort();
        assert_eq!(cycle, vec!["alice", "bob", "carol", "dave"]);
    }
}

#[test]
fn online_submitters_are_preferred() {
    let queue = QueueScheduler::new(QueueSettings::default());
    queue.add(ready("a", "u1")).unwrap();
    queue.add(ready("b", "u2")).unwrap();
    queue.add(ready("c", "u2")).unwrap();

    let online: HashSet<String> = ["u2".to_string()].into_iter().collect();
    let ctx = PollContext::new(true, &online, true);
    assert_eq!(queue.poll_next(&ctx).unwrap().submitter.id, "u2");
    assert_eq!(queue.poll_next(&ctx).unwrap().submitter.id, "u2");
    // plus personne en ligne avec des candidats : retour à tout le monde
    assert_eq!(queue.poll_next(&ctx).unwrap().submitter.id, "u1");
}

#[test]
fn personal_top_wins_within_its_submitter_turn() {
    let queue = QueueScheduler::new(QueueSettings::default());
    queue.add(ready("a1", "u1")).unwrap();
    queue.add(ready("a2", "u1")).unwrap();
    let target = queue.add(ready("a3", "u1")).unwrap();
    queue.add(ready("b1", "u2")).unwrap();

    let outcome = queue.promote(&target.queue_id, true).unwrap();
    assert_eq!(outcome, PromoteOutcome::PersonalTop);

    // promotion sur place : l'ordre physique ne change pas
    let ids: Vec<String> = queue.snapshot().into_iter().map(|v| v.track.id).collect();
    assert_eq!(ids, vec!["a1", "a2", "a3", "b1"]);
    assert!(queue.snapshot()[2].queue_id.starts_with("USERTOP-"));

    let online = no_one();
    let ctx = PollContext::new(true, &online, true);
    assert_eq!(queue.poll_next(&ctx).unwrap().track.id, "a3");
}

#[test]
fn promotion_law() {
    let queue = QueueScheduler::new(QueueSettings::default());
    queue.add(ready("a", "u1")).unwrap();
    let entry = queue.add(ready("b", "u1")).unwrap();

    assert_eq!(
        queue.promote(&entry.queue_id, true).unwrap(),
        PromoteOutcome::PersonalTop
    );
    // l'identifiant préfixé est accepté
    let personal_id = queue.snapshot()[1].queue_id.clone();
    assert_eq!(
        queue.promote(&personal_id, true).unwrap(),
        PromoteOutcome::GlobalTop
    );

    let snapshot = queue.snapshot();
    assert_eq!(snapshot[0].track.id, "b");
    assert_eq!(snapshot[0].priority, Priority::GlobalTop);

    let global_id = snapshot[0].queue_id.clone();
    assert_eq!(
        queue.promote(&global_id, false).unwrap(),
        PromoteOutcome::Unchanged
    );
    assert_eq!(queue.snapshot(), snapshot);
}

#[test]
fn global_tops_are_fifo_and_do_not_block() {
    let queue = QueueScheduler::new(QueueSettings::default());
    queue.add(ready("n", "u1")).unwrap();
    let first = queue.add(ready("g1", "u2")).unwrap();
    let second = queue.add(ready("g2", "u3")).unwrap();
    let pending = queue
        .add(QueueEntry::new(track("p"), Submitter::new("u4", "U4"), Readiness::Pending))
        .unwrap();

    queue.promote(&pending.queue_id, false).unwrap();
    queue.promote(&first.queue_id, false).unwrap();
    queue.promote(&second.queue_id, false).unwrap();

    let ids: Vec<String> = queue.snapshot().into_iter().map(|v| v.track.id).collect();
    assert_eq!(ids, vec!["p", "g1", "g2", "n"]);

    let online = no_one();
    let ctx = PollContext::new(true, &online, true);
    assert_eq!(queue.poll_next(&ctx).unwrap().track.id, "g1");
    assert_eq!(queue.poll_next(&ctx).unwrap().track.id, "g2");
    // la tête globale non prête est sautée
    assert_eq!(queue.poll_next(&ctx).unwrap().track.id, "n");
    assert!(queue.poll_next(&ctx).is_none());
    assert_eq!(queue.len(), 1);
}

#[test]
fn capacity_is_enforced_without_mutation() {
    let queue = QueueScheduler::new(QueueSettings {
        max_size: 2,
        ..QueueSettings::default()
    });
    queue.add(ready("a", "u1")).unwrap();
    queue.add(ready("b", "u1")).unwrap();

    let err = queue.add(ready("c", "u1")).unwrap_err();
    assert_eq!(err, QueueError::CapacityExceeded { max: 2 });
    assert_eq!(queue.len(), 2);
}

#[test]
fn duplicate_policies() {
    let strict = QueueScheduler::new(QueueSettings::default());
    strict.add(ready("a", "u1")).unwrap();
    assert!(matches!(
        strict.add(ready("a", "u2")),
        Err(QueueError::Duplicate(_))
    ));

    let per_user = QueueScheduler::new(QueueSettings {
        duplicate_policy: DuplicatePolicy::RejectSameSubmitter,
        ..QueueSettings::default()
    });
    per_user.add(ready("a", "u1")).unwrap();
    per_user.add(ready("a", "u2")).unwrap();
    assert!(per_user.add(ready("a", "u1")).is_err());

    let open = QueueScheduler::new(QueueSettings {
        duplicate_policy: DuplicatePolicy::Allow,
        ..QueueSettings::default()
    });
    open.add(ready("a", "u1")).unwrap();
    open.add(ready("a", "u1")).unwrap();
    assert_eq!(open.len(), 2);
}

#[test]
fn remove_accepts_prefixed_ids_and_remove_by_submitter() {
    let queue = QueueScheduler::new(QueueSettings::default());
    let a = queue.add(ready("a", "u1")).unwrap();
    queue.add(ready("b", "u1")).unwrap();
    queue.add(ready("c", "u2")).unwrap();

    queue.promote(&a.queue_id, false).unwrap();
    let removed = queue.remove(&format!("TOP-{}", a.queue_id)).unwrap();
    assert_eq!(removed.track.id, "a");
    assert!(matches!(queue.remove("nope"), Err(QueueError::NotFound(_))));

    assert_eq!(queue.remove_by_submitter("u1"), 1);
    assert_eq!(queue.len(), 1);
}

#[test]
fn auto_dj_samples_history_when_queue_is_empty() {
    let queue = QueueScheduler::new(QueueSettings::default());
    let online = no_one();

    // rien dans l'historique
    assert!(queue.poll_next(&PollContext::new(false, &online, true)).is_none());

    queue.add_to_history(track("old"));
    queue.add_to_history(track("recent"));

    // personne pour écouter
    assert!(queue.poll_next(&PollContext::new(false, &online, false)).is_none());

    let pick = queue
        .poll_next(&PollContext::new(false, &online, true))
        .unwrap();
    assert!(pick.auto_dj);
    assert!(pick.submitter.is_system());
    assert_eq!(pick.readiness, Readiness::Ready);
    assert!(pick.track.id == "old" || pick.track.id == "recent");
    assert!(queue.is_empty());
}

#[test]
fn auto_dj_can_be_disabled() {
    let queue = QueueScheduler::new(QueueSettings {
        auto_dj: false,
        ..QueueSettings::default()
    });
    queue.add_to_history(track("old"));
    let online = no_one();
    assert!(queue.poll_next(&PollContext::new(false, &online, true)).is_none());
}
