//! Property tests for the transaction table and local CSeq handling

mod common;

use common::Fixture;
use proptest::prelude::*;
use rsems_dialog_core::{DialogKey, MessageOptions, TransactionConfig, TransactionTable, TransactionType};
use rsems_sip_core::{Method, SipRequest};

fn table() -> TransactionTable {
    TransactionTable::new(&TransactionConfig { bucket_count: 16, t1_ms: 500 }).unwrap()
}

proptest! {
    #[test]
    fn bucket_index_stays_in_range(call_id in "[a-z0-9@.]{1,40}", cseq in any::<u32>()) {
        let table = table();
        let idx = table.bucket_index(&call_id, cseq);
        prop_assert!(idx < table.bucket_count());
        prop_assert_eq!(idx, table.bucket_index(&call_id, cseq));
    }

    #[test]
    fn added_transactions_are_found_and_removed(cseqs in prop::collection::btree_set(1u32..10_000, 1..30)) {
        let table = table();
        let key = DialogKey::new("prop-call", "local");
        let ids: Vec<_> = cseqs
            .iter()
            .map(|cseq| {
                let req = SipRequest::new(Method::Info, "sip:x@y", "prop-call", *cseq)
                    .with_branch(format!("z9hG4bK-{}", cseq));
                (req.clone(), table.add_trans(&req, TransactionType::Uas, &key))
            })
            .collect();
        prop_assert_eq!(table.len(), ids.len());

        for (req, id) in &ids {
            prop_assert_eq!(table.match_request(req, TransactionType::Uas), Some(*id));
            prop_assert!(table.match_request(req, TransactionType::Uac).is_none());
        }
        for (_, id) in &ids {
            prop_assert!(table.remove(*id).is_some());
        }
        prop_assert!(table.is_empty());
    }

    #[test]
    fn local_cseq_strictly_increases(outcomes in prop::collection::vec(any::<bool>(), 1..40)) {
        let fx = Fixture::new();
        let mut dialog = fx.uac_dialog();
        let mut last_sent: Option<u32> = None;

        for ok in outcomes {
            *fx.sender.fail.lock() = !ok;
            let before = dialog.cseq();
            match dialog.send_request(Method::Options, MessageOptions::default()) {
                Ok(cseq) => {
                    prop_assert_eq!(cseq, before);
                    prop_assert_eq!(dialog.cseq(), before + 1);
                    if let Some(prev) = last_sent {
                        prop_assert!(cseq > prev);
                    }
                    last_sent = Some(cseq);
                }
                Err(_) => prop_assert_eq!(dialog.cseq(), before),
            }
        }
    }
}
