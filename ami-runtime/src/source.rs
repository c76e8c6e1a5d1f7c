//! Event producers. spec.md §4.6 names the interface only; the concrete
//! implementations here are recovered from `ami/data.py`'s `StaticSource`
//! and `RandomSource` (`PsanaSource` is out of scope per spec.md §1).

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use ami_types::{ElementType, Message, Value};

/// A per-worker event producer.
///
/// `request` narrows which names subsequent datagrams carry, matching
/// `ami/worker.py`'s allocate/configure/request cycle: a worker asks for
/// exactly the names its compiled sub-graph needs.
pub trait Source: Send {
    /// The name→type advertisement a worker allocates against.
    fn partition(&self) -> BTreeMap<String, ElementType>;

    /// Restricts subsequent datagrams to `names` (plus implicit base names,
    /// which this trait's implementations always carry regardless).
    fn request(&mut self, names: BTreeSet<String>);

    /// The delay a caller should sleep before requesting the first event.
    fn init_time(&self) -> Duration;

    /// The delay a caller should sleep between events.
    fn interval(&self) -> Duration;

    /// Produces the next event for this identity, or `None` once the
    /// source is exhausted (only `StaticSource` with a `bound` ever is).
    fn next_event(&mut self, identity: u64, num_workers: u64) -> Option<Message>;
}

/// The shape of one named field a source advertises: its element type plus
/// enough parameters to generate a value of that shape.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldSpec {
    Scalar,
    Waveform(usize),
    Image(usize, usize),
}

impl FieldSpec {
    fn element_type(&self) -> ElementType {
        match self {
            FieldSpec::Scalar => ElementType::Scalar,
            FieldSpec::Waveform(_) => ElementType::Waveform,
            FieldSpec::Image(_, _) => ElementType::Image,
        }
    }

    fn constant(&self) -> Value {
        match self {
            FieldSpec::Scalar => Value::Scalar(1.0),
            FieldSpec::Waveform(len) => Value::Waveform(vec![1.0; *len]),
            FieldSpec::Image(rows, cols) => Value::Image(vec![vec![1.0; *cols]; *rows]),
        }
    }
}

/// A source that always emits the same constant values, used by spec.md §8
/// scenario 1 and wherever a deterministic fixture is needed.
///
/// Matches `ami/data.py::StaticSource`: per-event timestamp
/// `num_workers * count + identity`, Scalar fields fixed at `1`, Waveform/
/// Image fields filled with ones, and an optional `bound` on the number of
/// events before the source reports exhaustion (unbounded if `None`, as the
/// original's `np.inf` default).
pub struct StaticSource {
    config: BTreeMap<String, FieldSpec>,
    requested: Option<BTreeSet<String>>,
    bound: Option<u64>,
    init_time: Duration,
    interval: Duration,
    count: u64,
}

impl StaticSource {
    pub fn new(config: BTreeMap<String, FieldSpec>, bound: Option<u64>, init_time: Duration, interval: Duration) -> Self {
        StaticSource { config, requested: None, bound, init_time, interval, count: 0 }
    }
}

impl Source for StaticSource {
    fn partition(&self) -> BTreeMap<String, ElementType> {
        self.config.iter().map(|(name, spec)| (name.clone(), spec.element_type())).collect()
    }

    fn request(&mut self, names: BTreeSet<String>) {
        self.requested = Some(names);
    }

    fn init_time(&self) -> Duration {
        self.init_time
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn next_event(&mut self, identity: u64, num_workers: u64) -> Option<Message> {
        if let Some(bound) = self.bound {
            if self.count >= bound {
                return None;
            }
        }
        let timestamp = num_workers * self.count + identity;
        self.count += 1;
        let mut payload = BTreeMap::new();
        for (name, spec) in &self.config {
            if let Some(requested) = &self.requested {
                if !requested.contains(name) {
                    continue;
                }
            }
            payload.insert(name.clone(), spec.constant());
        }
        Some(Message::datagram(identity, timestamp, payload))
    }
}

/// The shape and sampling parameters of one random field.
#[derive(Clone, Debug, PartialEq)]
pub enum RandomFieldSpec {
    Scalar { min: f64, max: f64 },
    Waveform { len: usize, pedestal: f64, width: f64 },
    Image { rows: usize, cols: usize, pedestal: f64, width: f64 },
}

impl RandomFieldSpec {
    fn element_type(&self) -> ElementType {
        match self {
            RandomFieldSpec::Scalar { .. } => ElementType::Scalar,
            RandomFieldSpec::Waveform { .. } => ElementType::Waveform,
            RandomFieldSpec::Image { .. } => ElementType::Image,
        }
    }

    fn sample(&self, rng: &mut SmallRng) -> Value {
        match self {
            RandomFieldSpec::Scalar { min, max } => Value::Scalar(rng.gen_range(*min..*max)),
            RandomFieldSpec::Waveform { len, pedestal, width } => {
                Value::Waveform((0..*len).map(|_| sample_normal(rng, *pedestal, *width)).collect())
            }
            RandomFieldSpec::Image { rows, cols, pedestal, width } => Value::Image(
                (0..*rows).map(|_| (0..*cols).map(|_| sample_normal(rng, *pedestal, *width)).collect()).collect(),
            ),
        }
    }
}

/// Box-Muller normal sampling; `rand_distr` isn't part of this workspace's
/// dependency set, and this needs nothing more than `rand::Rng::gen`.
fn sample_normal(rng: &mut SmallRng, mean: f64, std_dev: f64) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    let z0 = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
    mean + z0 * std_dev
}

/// A source that emits range-sampled random values, used for load testing.
///
/// Matches `ami/data.py::RandomSource`: same timestamp/partition/request
/// shape as `StaticSource`, but each event draws fresh values from a seeded
/// RNG instead of returning a constant.
pub struct RandomSource {
    config: BTreeMap<String, RandomFieldSpec>,
    requested: Option<BTreeSet<String>>,
    rng: SmallRng,
    init_time: Duration,
    interval: Duration,
    count: u64,
}

impl RandomSource {
    pub fn new(config: BTreeMap<String, RandomFieldSpec>, seed: u64, init_time: Duration, interval: Duration) -> Self {
        RandomSource { config, requested: None, rng: SmallRng::seed_from_u64(seed), init_time, interval, count: 0 }
    }
}

impl Source for RandomSource {
    fn partition(&self) -> BTreeMap<String, ElementType> {
        self.config.iter().map(|(name, spec)| (name.clone(), spec.element_type())).collect()
    }

    fn request(&mut self, names: BTreeSet<String>) {
        self.requested = Some(names);
    }

    fn init_time(&self) -> Duration {
        self.init_time
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn next_event(&mut self, identity: u64, num_workers: u64) -> Option<Message> {
        let timestamp = num_workers * self.count + identity;
        self.count += 1;
        let mut payload = BTreeMap::new();
        let names: Vec<String> = self.config.keys().cloned().collect();
        for name in names {
            if let Some(requested) = &self.requested {
                if !requested.contains(&name) {
                    continue;
                }
            }
            let spec = self.config[&name].clone();
            payload.insert(name, spec.sample(&mut self.rng));
        }
        Some(Message::datagram(identity, timestamp, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_source_emits_ones_and_strided_timestamps() {
        let mut config = BTreeMap::new();
        config.insert("a".to_string(), FieldSpec::Scalar);
        let mut source = StaticSource::new(config, None, Duration::ZERO, Duration::ZERO);
        let first = source.next_event(1, 2).unwrap();
        assert_eq!(first.timestamp, 1);
        let second = source.next_event(1, 2).unwrap();
        assert_eq!(second.timestamp, 3);
    }

    #[test]
    fn static_source_stops_at_its_bound() {
        let mut config = BTreeMap::new();
        config.insert("a".to_string(), FieldSpec::Scalar);
        let mut source = StaticSource::new(config, Some(2), Duration::ZERO, Duration::ZERO);
        assert!(source.next_event(0, 1).is_some());
        assert!(source.next_event(0, 1).is_some());
        assert!(source.next_event(0, 1).is_none());
    }

    #[test]
    fn request_narrows_the_emitted_names() {
        let mut config = BTreeMap::new();
        config.insert("a".to_string(), FieldSpec::Scalar);
        config.insert("b".to_string(), FieldSpec::Scalar);
        let mut source = StaticSource::new(config, None, Duration::ZERO, Duration::ZERO);
        source.request(BTreeSet::from(["a".to_string()]));
        let event = source.next_event(0, 1).unwrap();
        match event.kind {
            ami_types::MsgKind::Datagram(payload) => {
                assert!(payload.contains_key("a"));
                assert!(!payload.contains_key("b"));
            }
            _ => panic!("expected a datagram"),
        }
    }

    #[test]
    fn random_source_samples_within_range() {
        let mut config = BTreeMap::new();
        config.insert("a".to_string(), RandomFieldSpec::Scalar { min: 0.0, max: 1.0 });
        let mut source = RandomSource::new(config, 7, Duration::ZERO, Duration::ZERO);
        let event = source.next_event(0, 1).unwrap();
        match event.kind {
            ami_types::MsgKind::Datagram(payload) => match payload.get("a") {
                Some(Value::Scalar(x)) => assert!(*x >= 0.0 && *x < 1.0),
                _ => panic!("expected a scalar"),
            },
            _ => panic!("expected a datagram"),
        }
    }
}
