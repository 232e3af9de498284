//! Top-K selection over one tick's process samples.

use crate::types::ProcessSample;
use std::cmp::Ordering;

/// Number of processes kept per tick.
pub const TOP_K: usize = 5;

/// Sort descending by (ram_percent, cpu_percent) and keep at most [`TOP_K`].
/// The sort is stable; exact ties keep their input order.
pub fn rank(mut samples: Vec<ProcessSample>) -> Vec<ProcessSample> {
    samples.sort_by(|a, b| {
        cmp_desc(a.ram_percent, b.ram_percent).then_with(|| cmp_desc(a.cpu_percent, b.cpu_percent))
    });
    samples.truncate(TOP_K);
    samples
}

fn cmp_desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HostIdentity;

    fn p(name: &str, cpu: f64, ram: f64) -> ProcessSample {
        ProcessSample {
            capture_time: "2026-10-18_10-00-00".into(),
            process_name: name.into(),
            cpu_percent: cpu,
            ram_percent: ram,
            disk_write_mb: 0.0,
            host_identity: HostIdentity(1),
            host_model: "m".into(),
            owner_id: 1,
        }
    }

    fn names(v: &[ProcessSample]) -> Vec<&str> {
        v.iter().map(|s| s.process_name.as_str()).collect()
    }

    #[test]
    fn ram_first_then_cpu() {
        let out = rank(vec![
            p("low", 50.0, 1.0),
            p("big", 0.1, 9.0),
            p("tie_hi_cpu", 7.0, 3.0),
            p("tie_lo_cpu", 2.0, 3.0),
        ]);
        assert_eq!(names(&out), ["big", "tie_hi_cpu", "tie_lo_cpu", "low"]);
    }

    #[test]
    fn truncates_to_top_k() {
        let input: Vec<_> = (0..12).map(|i| p(&format!("p{i}"), 0.0, i as f64)).collect();
        let out = rank(input);
        assert_eq!(out.len(), TOP_K);
        assert_eq!(names(&out), ["p11", "p10", "p9", "p8", "p7"]);
        for w in out.windows(2) {
            assert!(w[0].ram_percent >= w[1].ram_percent);
        }
    }

    #[test]
    fn exact_ties_keep_input_order() {
        let out = rank(vec![p("first", 1.0, 2.0), p("second", 1.0, 2.0)]);
        assert_eq!(names(&out), ["first", "second"]);
    }

    #[test]
    fn empty_and_short_inputs() {
        assert!(rank(Vec::new()).is_empty());
        assert_eq!(rank(vec![p("only", 1.0, 0.0)]).len(), 1);
    }
}
