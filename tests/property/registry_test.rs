// tests/property/registry_test.rs

//! Property-based tests for the one-live-session-per-identity rule.

use proptest::prelude::*;
use std::collections::HashMap;
use tilegate::core::protocol::{Envelope, EnvelopeKind, KickReason, Kickout};
use tilegate::core::registry::SessionRegistry;
use tilegate::core::state::SessionHandle;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Debug, Clone)]
enum Op {
    Register(i64),
    Disconnect(i64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0i64..5).prop_map(Op::Register),
        1 => (0i64..5).prop_map(Op::Disconnect),
    ]
}

fn kickout_notice(identity: i64) -> Option<Envelope> {
    Some(Envelope::kickout(identity, KickReason::DuplicateLogin))
}

proptest! {
    #[test]
    fn test_at_most_one_live_session_per_identity(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let registry = SessionRegistry::new("player", kickout_notice);
        let mut sessions: Vec<(i64, SessionHandle, UnboundedReceiver<Envelope>)> = Vec::new();
        let mut conn_id = 0u64;

        for op in ops {
            match op {
                Op::Register(identity) => {
                    conn_id += 1;
                    let (handle, rx) =
                        SessionHandle::new(conn_id, "127.0.0.1:1".parse().unwrap(), None);
                    registry.register(identity, handle.clone());
                    sessions.push((identity, handle, rx));
                }
                Op::Disconnect(identity) => {
                    if let Some(handle) = registry.lookup(identity) {
                        handle.close(None);
                        registry.remove_if_current(identity, handle.conn_id());
                    }
                }
            }

            let mut live: HashMap<i64, usize> = HashMap::new();
            for (identity, handle, _) in &sessions {
                if !handle.is_closed() {
                    *live.entry(*identity).or_default() += 1;
                }
            }
            prop_assert!(live.values().all(|count| *count <= 1));
            for (identity, count) in live {
                prop_assert_eq!(count, 1);
                let registered = registry.lookup_live(identity);
                prop_assert!(registered.is_some());
            }
        }

        // Every evicted session got the duplicate-login notice as its farewell.
        for (identity, handle, _) in &sessions {
            if let Some(farewell) = handle.take_farewell() {
                prop_assert_eq!(farewell.kind().unwrap(), EnvelopeKind::Kickout);
                let kick: Kickout = farewell.decode_record().unwrap();
                prop_assert_eq!(kick.player, *identity);
                prop_assert_eq!(kick.reason, KickReason::DuplicateLogin);
            }
        }
    }
}
