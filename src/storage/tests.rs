//! Storage Module Tests
//!
//! ## Test Scopes
//! - **Natural key**: identity independent of local row ids.
//! - **MemoryReportStore**: insert-if-absent, monotonic alert flag, listing order,
//!   pending alert scans and alerts that arrive before their report.
//! - **SqliteReportStore**: the same contract on disk, plus rows surviving a reopen.

#[cfg(test)]
mod tests {
    use crate::storage::memory::{MemoryReportStore, ReportStore};
    use crate::storage::sqlite::SqliteReportStore;
    use crate::storage::types::{AlertOutcome, InsertOutcome, Report, ReportData, RiskTier};

    fn report(patient: &str, timestamp: i64, tier: RiskTier) -> ReportData {
        ReportData {
            patient_id: patient.to_string(),
            timestamp,
            features: [65.0, 135.0, 1.9, 25.0, 4.0],
            probability: 0.72,
            tier,
        }
    }

    // ============================================================
    // TYPE TESTS
    // ============================================================

    #[test]
    fn test_natural_key_ignores_probability_and_tier() {
        let a = report("p1", 100, RiskTier::Red);
        let mut b = a.clone();
        b.probability = 0.1;
        b.tier = RiskTier::Green;
        assert_eq!(a.natural_key(), b.natural_key());

        let mut c = a.clone();
        c.features[2] = 1.91;
        assert_ne!(a.natural_key(), c.natural_key());
    }

    #[test]
    fn test_risk_tier_parse_and_serialize() {
        assert_eq!("red".parse::<RiskTier>().unwrap(), RiskTier::Red);
        assert_eq!(" AMBER ".parse::<RiskTier>().unwrap(), RiskTier::Amber);
        assert!("PURPLE".parse::<RiskTier>().is_err());
        assert_eq!(serde_json::to_string(&RiskTier::Green).unwrap(), "\"GREEN\"");
    }

    #[test]
    fn test_report_serializes_flat() {
        let row = Report {
            id: 3,
            data: report("p1", 100, RiskTier::Red),
            alert_sent: false,
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["patient_id"], "p1");
        assert_eq!(json["tier"], "RED");
        assert_eq!(json["id"], 3);

        let back: Report = serde_json::from_value(json).unwrap();
        assert_eq!(back, row);
    }

    // ============================================================
    // MEMORY STORE TESTS
    // ============================================================

    #[test]
    fn test_insert_if_absent_dedupes_by_natural_key() {
        let store = MemoryReportStore::new();

        let first = store.insert_if_absent(report("p1", 100, RiskTier::Red)).unwrap();
        let second = store.insert_if_absent(report("p1", 100, RiskTier::Red)).unwrap();

        assert_eq!(first, InsertOutcome::Inserted(1));
        assert_eq!(second, InsertOutcome::Existing(1));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_row_ids_are_monotonic() {
        let store = MemoryReportStore::new();
        let a = store.insert_if_absent(report("p1", 100, RiskTier::Green)).unwrap();
        let b = store.insert_if_absent(report("p2", 100, RiskTier::Green)).unwrap();
        assert!(b.id() > a.id());
    }

    #[test]
    fn test_alert_flag_is_monotonic() {
        let store = MemoryReportStore::new();
        let data = report("p1", 100, RiskTier::Red);
        let key = data.natural_key();
        let id = store.insert_if_absent(data).unwrap().id();

        assert_eq!(store.mark_alert_sent(&key).unwrap(), AlertOutcome::Flagged);
        assert_eq!(store.mark_alert_sent_by_id(id).unwrap(), AlertOutcome::AlreadyFlagged);
        assert!(store.get(id).unwrap().alert_sent);

        // restoring an unflagged copy never clears it
        let copy = Report {
            id: 99,
            data: report("p1", 100, RiskTier::Red),
            alert_sent: false,
        };
        store.restore(copy).unwrap();
        assert!(store.get(id).unwrap().alert_sent);
    }

    #[test]
    fn test_mark_alert_unknown_key() {
        let store = MemoryReportStore::new();
        let key = report("ghost", 1, RiskTier::Red).natural_key();
        assert_eq!(store.mark_alert_sent(&key).unwrap(), AlertOutcome::NotFound);
        assert_eq!(store.mark_alert_sent_by_id(42).unwrap(), AlertOutcome::NotFound);
    }

    #[test]
    fn test_restore_flips_existing_flag() {
        let store = MemoryReportStore::new();
        let id = store
            .insert_if_absent(report("p1", 100, RiskTier::Red))
            .unwrap()
            .id();

        let (outcome, alert) = store
            .restore(Report {
                id: 7,
                data: report("p1", 100, RiskTier::Red),
                alert_sent: true,
            })
            .unwrap();

        assert_eq!(outcome, InsertOutcome::Existing(id));
        assert_eq!(alert, AlertOutcome::Flagged);
        assert!(store.get(id).unwrap().alert_sent);
    }

    #[test]
    fn test_restore_assigns_local_id() {
        let store = MemoryReportStore::new();
        let (outcome, _) = store
            .restore(Report {
                id: 500,
                data: report("p1", 100, RiskTier::Amber),
                alert_sent: false,
            })
            .unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted(1));
        assert!(store.get(500).is_none());
    }

    #[test]
    fn test_list_for_patient_newest_first() {
        let store = MemoryReportStore::new();
        store.insert_if_absent(report("p1", 200, RiskTier::Green)).unwrap();
        store.insert_if_absent(report("p1", 300, RiskTier::Amber)).unwrap();
        store.insert_if_absent(report("p2", 400, RiskTier::Red)).unwrap();
        store.insert_if_absent(report("p1", 100, RiskTier::Red)).unwrap();

        let all = store.list_for_patient("p1", None).unwrap();
        let stamps: Vec<i64> = all.iter().map(|r| r.data.timestamp).collect();
        assert_eq!(stamps, vec![300, 200, 100]);

        let latest = store.list_for_patient("p1", Some(2)).unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].data.timestamp, 300);

        assert!(store.list_for_patient("nobody", None).unwrap().is_empty());
    }

    #[test]
    fn test_pending_alerts_after_cursor() {
        let store = MemoryReportStore::new();
        let red1 = store.insert_if_absent(report("p1", 1, RiskTier::Red)).unwrap().id();
        store.insert_if_absent(report("p1", 2, RiskTier::Amber)).unwrap();
        let red2 = store.insert_if_absent(report("p1", 3, RiskTier::Red)).unwrap().id();

        let pending: Vec<u64> = store.pending_alerts(0).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(pending, vec![red1, red2]);

        store.mark_alert_sent_by_id(red2).unwrap();
        assert_eq!(store.pending_alerts(0).unwrap().len(), 1);
        assert!(store.pending_alerts(red1).unwrap().is_empty());
    }

    #[test]
    fn test_scan_in_id_order() {
        let store = MemoryReportStore::new();
        for ts in [5, 3, 9] {
            store.insert_if_absent(report("p1", ts, RiskTier::Green)).unwrap();
        }
        let ids: Vec<u64> = store.scan().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_alert_before_report_is_applied_on_insert() {
        let store = MemoryReportStore::new();
        let data = report("p1", 100, RiskTier::Red);

        assert_eq!(
            store.mark_alert_sent(&data.natural_key()).unwrap(),
            AlertOutcome::NotFound
        );
        let id = store.insert_if_absent(data).unwrap().id();

        assert!(store.get(id).unwrap().alert_sent);
        assert!(store.pending_alerts(0).unwrap().is_empty());
    }

    #[test]
    fn test_alert_before_snapshot_row_survives_restore() {
        let store = MemoryReportStore::new();
        let data = report("p1", 100, RiskTier::Red);
        store.mark_alert_sent(&data.natural_key()).unwrap();

        // the snapshot was taken before the leader flagged the row
        let (outcome, alert) = store
            .restore(Report {
                id: 12,
                data,
                alert_sent: false,
            })
            .unwrap();

        assert!(outcome.is_inserted());
        assert_eq!(alert, AlertOutcome::Flagged);
        assert!(store.get(outcome.id()).unwrap().alert_sent);
    }

    // ============================================================
    // SQLITE STORE TESTS
    // ============================================================

    fn sqlite() -> (tempfile::TempDir, std::sync::Arc<SqliteReportStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteReportStore::open(dir.path().join("reports.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_sqlite_insert_if_absent_dedupes_by_natural_key() {
        let (_dir, store) = sqlite();

        let first = store.insert_if_absent(report("p1", 100, RiskTier::Red)).unwrap();
        let second = store.insert_if_absent(report("p1", 100, RiskTier::Red)).unwrap();
        let other = store.insert_if_absent(report("p1", 101, RiskTier::Red)).unwrap();

        assert_eq!(first, InsertOutcome::Inserted(1));
        assert_eq!(second, InsertOutcome::Existing(1));
        assert_eq!(other, InsertOutcome::Inserted(2));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_sqlite_round_trips_every_column() {
        let (_dir, store) = sqlite();
        let data = ReportData {
            features: [71.5, 133.0, 1.23456789, 20.0, 187.0],
            probability: 0.8125,
            ..report("p9", 1_700_000_123, RiskTier::Amber)
        };
        let id = store.insert_if_absent(data.clone()).unwrap().id();

        let row = store.get(id).unwrap();
        assert_eq!(row.data, data);
        assert!(!row.alert_sent);
        assert!(store.get(id + 1).is_none());
    }

    #[test]
    fn test_sqlite_alert_flag_is_monotonic() {
        let (_dir, store) = sqlite();
        let data = report("p1", 100, RiskTier::Red);
        let key = data.natural_key();
        let id = store.insert_if_absent(data).unwrap().id();

        assert_eq!(store.pending_alerts(0).unwrap().len(), 1);
        assert_eq!(store.mark_alert_sent(&key).unwrap(), AlertOutcome::Flagged);
        assert_eq!(store.mark_alert_sent_by_id(id).unwrap(), AlertOutcome::AlreadyFlagged);
        assert_eq!(store.mark_alert_sent_by_id(id + 1).unwrap(), AlertOutcome::NotFound);
        assert!(store.pending_alerts(0).unwrap().is_empty());

        let (_, alert) = store
            .restore(Report {
                id: 40,
                data: report("p1", 100, RiskTier::Red),
                alert_sent: false,
            })
            .unwrap();
        assert_eq!(alert, AlertOutcome::AlreadyFlagged);
        assert!(store.get(id).unwrap().alert_sent);
    }

    #[test]
    fn test_sqlite_alert_before_report() {
        let (_dir, store) = sqlite();
        let data = report("p1", 100, RiskTier::Red);

        assert_eq!(
            store.mark_alert_sent(&data.natural_key()).unwrap(),
            AlertOutcome::NotFound
        );
        let (outcome, alert) = store
            .restore(Report {
                id: 3,
                data,
                alert_sent: false,
            })
            .unwrap();

        assert_eq!(alert, AlertOutcome::Flagged);
        assert!(store.get(outcome.id()).unwrap().alert_sent);
    }

    #[test]
    fn test_sqlite_list_and_scan_order() {
        let (_dir, store) = sqlite();
        store.insert_if_absent(report("p1", 200, RiskTier::Green)).unwrap();
        store.insert_if_absent(report("p1", 300, RiskTier::Amber)).unwrap();
        store.insert_if_absent(report("p2", 400, RiskTier::Red)).unwrap();
        store.insert_if_absent(report("p1", 100, RiskTier::Red)).unwrap();

        let stamps: Vec<i64> = store
            .list_for_patient("p1", None)
            .unwrap()
            .iter()
            .map(|r| r.data.timestamp)
            .collect();
        assert_eq!(stamps, vec![300, 200, 100]);
        assert_eq!(store.list_for_patient("p1", Some(1)).unwrap()[0].data.timestamp, 300);

        let ids: Vec<u64> = store.scan().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);

        let pending: Vec<u64> = store.pending_alerts(3).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(pending, vec![4]);
    }

    #[test]
    fn test_sqlite_rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.db");

        {
            let store = SqliteReportStore::open(&path).unwrap();
            let id = store.insert_if_absent(report("p1", 100, RiskTier::Red)).unwrap().id();
            store.mark_alert_sent_by_id(id).unwrap();
            store.insert_if_absent(report("p1", 200, RiskTier::Amber)).unwrap();
        }

        let store = SqliteReportStore::open(&path).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.pending_alerts(0).unwrap().is_empty());
        assert_eq!(
            store.insert_if_absent(report("p1", 100, RiskTier::Red)).unwrap(),
            InsertOutcome::Existing(1)
        );
        assert_eq!(
            store.insert_if_absent(report("p1", 300, RiskTier::Green)).unwrap(),
            InsertOutcome::Inserted(3)
        );
    }
}
