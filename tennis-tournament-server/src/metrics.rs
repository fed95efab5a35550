use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct Metrics {
    pub http_requests_total: Counter,

    /// Settlements with a committed result.
    pub settlements_total: Counter,
    /// Settlement requests rejected before or during stage 1.
    pub settlements_rejected_total: Counter,
    pub ladder_failures_total: Counter,

    pub reconciled_matches_total: Counter,
}

macro_rules! impl_serialize {
    ($this:expr, $($metric:ident),*$(,)?) => {
        let mut buf = Vec::new();

        $(
            let _ = writeln!(
                buf,
                "{} {}",
                stringify!($metric),
                $this.$metric.get()
            );
        )*

        buf
    };
}

impl Metrics {
    /// Serializes all metrics in the plain text exposition format, one `name value` per line.
    pub fn serialize(&self) -> Vec<u8> {
        impl_serialize! {
            self,
            http_requests_total,
            settlements_total,
            settlements_rejected_total,
            ladder_failures_total,
            reconciled_matches_total,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: usize) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::Metrics;

    #[test]
    fn test_metrics_serialize() {
        let metrics = Metrics::default();
        metrics.http_requests_total.add(12);
        metrics.settlements_total.inc();
        metrics.reconciled_matches_total.add(3);

        let body = String::from_utf8(metrics.serialize()).unwrap();
        assert_eq!(
            body,
            "http_requests_total 12\n\
             settlements_total 1\n\
             settlements_rejected_total 0\n\
             ladder_failures_total 0\n\
             reconciled_matches_total 3\n"
        );
    }
}
