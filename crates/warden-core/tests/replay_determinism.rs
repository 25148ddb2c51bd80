//! Determinism properties: replaying a session's log reproduces the
//! live state exactly, for arbitrary interleavings of collaborator
//! requests, and no gated record ever lands without a grant.

use std::sync::Arc;

use proptest::prelude::*;

use warden_core::prelude::*;
use warden_core::reducer;

#[derive(Debug, Clone)]
enum Op {
    Interpret,
    RecordOk,
    RecordFail,
    Isolate,
    ProposeImplement,
    ProposeIntegrate,
    Approve,
    Deny,
    Abort,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Interpret),
        Just(Op::RecordOk),
        Just(Op::RecordFail),
        Just(Op::Isolate),
        Just(Op::ProposeImplement),
        Just(Op::ProposeIntegrate),
        Just(Op::Approve),
        Just(Op::Deny),
        Just(Op::Abort),
    ]
}

fn preset_strategy() -> impl Strategy<Value = TierPreset> {
    prop_oneof![
        Just(TierPreset::Low),
        Just(TierPreset::Medium),
        Just(TierPreset::High),
    ]
}

fn diff() -> DiffPayload {
    DiffPayload {
        summary: "walk step".to_string(),
        touched_paths: vec!["src/walk.rs".to_string()],
        body: String::new(),
    }
}

/// Drive a session with an arbitrary op sequence, ignoring rejections;
/// rejected requests must leave no trace, so the log stays replayable.
fn walk(preset: TierPreset, ops: &[Op]) -> (Arc<MemoryStore>, SessionMachine) {
    let store = Arc::new(MemoryStore::new());
    let mut machine = SessionMachine::start(
        Arc::clone(&store) as Arc<dyn EventStore>,
        SessionParams {
            tier: preset.policy(),
            target_path: "/work/repo".to_string(),
            requested_scope: ScopeDescriptor::new(["src/"]),
            verify_command: CommandSpec::new("cargo", vec!["test".to_string()]),
        },
    )
    .expect("start");

    for op in ops {
        let result = match op {
            Op::Interpret => machine.propose(Proposal::Interpret {
                summary: "walk".to_string(),
                inspect_paths: vec!["src/walk.rs".to_string()],
            }),
            Op::RecordOk | Op::RecordFail => {
                let Some(kind) = machine.state().outstanding else {
                    continue;
                };
                let outcome = if matches!(op, Op::RecordOk) {
                    EffectOutcome::success("ok")
                } else {
                    EffectOutcome::failure("failed")
                };
                machine.record_outcome(kind, outcome)
            }
            Op::Isolate => machine.propose(Proposal::Isolate {
                scope: ScopeDescriptor::new(["src/"]),
            }),
            Op::ProposeImplement => machine.propose(Proposal::Implement { diff: diff() }),
            Op::ProposeIntegrate => machine.propose(Proposal::Integrate),
            Op::Approve => machine.resolve_approval(true, "walk approve"),
            Op::Deny => machine.resolve_approval(false, "walk deny"),
            Op::Abort => machine.abort("walk abort"),
        };
        // Rejections are expected along arbitrary walks.
        let _ = result;
    }
    (store, machine)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn replay_reproduces_the_live_state(
        preset in preset_strategy(),
        ops in prop::collection::vec(op_strategy(), 0..40),
    ) {
        let (store, machine) = walk(preset, &ops);
        let records = store.read_all(machine.id()).expect("read");
        let replayed = reducer::replay(machine.id(), &records).expect("replay");
        prop_assert_eq!(&replayed, machine.state());
    }

    #[test]
    fn gated_records_always_follow_a_grant(
        preset in preset_strategy(),
        ops in prop::collection::vec(op_strategy(), 0..40),
    ) {
        let (store, machine) = walk(preset, &ops);
        let records = store.read_all(machine.id()).expect("read");
        let kinds: Vec<EventKind> = records.iter().map(EventRecord::kind).collect();

        for (i, kind) in kinds.iter().enumerate() {
            if matches!(kind, EventKind::ChangeImplemented | EventKind::Integrated) {
                let grant_since_last_gate = kinds[..i]
                    .iter()
                    .rev()
                    .take_while(|k| {
                        !matches!(k, EventKind::ChangeImplemented | EventKind::Integrated)
                    })
                    .any(|k| matches!(k, EventKind::ApprovalGranted));
                prop_assert!(grant_since_last_gate, "ungated record at index {}", i);
            }
        }
    }

    #[test]
    fn policy_verdicts_are_stable_under_repetition(
        preset in preset_strategy(),
        paths in prop::collection::vec("[a-z]{1,8}/[a-z]{1,8}\\.rs", 0..8),
        approved in any::<bool>(),
    ) {
        let tier = preset.policy();
        let scope = ScopeDescriptor::new(["src/"]);
        let mut metadata = RequestMetadata::for_paths(paths);
        metadata.approval_granted = approved;
        for kind in [
            EventKind::IntentInterpreted,
            EventKind::ScopeIsolated,
            EventKind::ChangeImplemented,
            EventKind::Integrated,
        ] {
            let first = PolicyGate::check(&tier, Stage::Isolated, kind, Some(&scope), &metadata);
            let second = PolicyGate::check(&tier, Stage::Isolated, kind, Some(&scope), &metadata);
            prop_assert_eq!(first, second);
        }
    }
}

#[test]
fn journal_replay_matches_across_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ops = [
        Op::Interpret,
        Op::RecordOk,
        Op::Isolate,
        Op::ProposeImplement,
        Op::Approve,
        Op::RecordOk,
        Op::RecordOk,
        Op::ProposeIntegrate,
        Op::Approve,
    ];

    let store = Arc::new(JournalStore::open(dir.path()).expect("open"));
    let mut machine = SessionMachine::start(
        Arc::clone(&store) as Arc<dyn EventStore>,
        SessionParams {
            tier: TierPreset::High.policy(),
            target_path: "/work/repo".to_string(),
            requested_scope: ScopeDescriptor::new(["src/"]),
            verify_command: CommandSpec::new("cargo", vec!["test".to_string()]),
        },
    )
    .expect("start");
    for op in &ops {
        let result = match op {
            Op::Interpret => machine.propose(Proposal::Interpret {
                summary: "walk".to_string(),
                inspect_paths: vec!["src/walk.rs".to_string()],
            }),
            Op::RecordOk => {
                let kind = machine.state().outstanding.expect("outstanding");
                machine.record_outcome(kind, EffectOutcome::success("ok"))
            }
            Op::Isolate => machine.propose(Proposal::Isolate {
                scope: ScopeDescriptor::new(["src/"]),
            }),
            Op::ProposeImplement => machine.propose(Proposal::Implement { diff: diff() }),
            Op::ProposeIntegrate => machine.propose(Proposal::Integrate),
            Op::Approve => machine.resolve_approval(true, "reviewed"),
            _ => unreachable!(),
        };
        result.expect("scripted flow");
    }
    assert_eq!(machine.stage(), Stage::Integrated);
    let id = machine.id();
    let live = machine.state().clone();
    store.write_snapshot(&live).expect("snapshot");
    drop(machine);
    drop(store);

    let reopened = JournalStore::open(dir.path()).expect("reopen");
    let resumed = reopened.resume(id).expect("resume");
    assert_eq!(resumed, live);
    reopened.verify_session(id).expect("verify");

    let full = reducer::replay(id, &reopened.read_all(id).expect("read")).expect("replay");
    assert_eq!(full, live);
}
