//! Parses the worker subcommand's positional `SOURCE=scheme://spec`
//! argument (spec.md §6) into a concrete [`ami_runtime::Source`].
//!
//! `psana://` and `hdf5://` name per-detector hardware drivers that are an
//! external collaborator per spec.md §1's non-goals; only `static://` and
//! `random://` are implemented here, each taking a comma-separated list of
//! `name:kind[:params]` fields rather than a JSON config path, since
//! `serde_json` isn't part of this workspace's dependency set.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use anyhow::{anyhow, Result};

use ami_runtime::{FieldSpec, RandomFieldSpec, RandomSource, Source, StaticSource};
use ami_types::{ElementType, Message};

/// Either concrete [`Source`] implementation the CLI can build, unified
/// behind one type so `Worker<AnySource>` stays monomorphic regardless of
/// which scheme the operator picked.
pub enum AnySource {
    Static(StaticSource),
    Random(RandomSource),
}

impl Source for AnySource {
    fn partition(&self) -> BTreeMap<String, ElementType> {
        match self {
            AnySource::Static(s) => s.partition(),
            AnySource::Random(s) => s.partition(),
        }
    }

    fn request(&mut self, names: BTreeSet<String>) {
        match self {
            AnySource::Static(s) => s.request(names),
            AnySource::Random(s) => s.request(names),
        }
    }

    fn init_time(&self) -> Duration {
        match self {
            AnySource::Static(s) => s.init_time(),
            AnySource::Random(s) => s.init_time(),
        }
    }

    fn interval(&self) -> Duration {
        match self {
            AnySource::Static(s) => s.interval(),
            AnySource::Random(s) => s.interval(),
        }
    }

    fn next_event(&mut self, identity: u64, num_workers: u64) -> Option<Message> {
        match self {
            AnySource::Static(s) => s.next_event(identity, num_workers),
            AnySource::Random(s) => s.next_event(identity, num_workers),
        }
    }
}

pub fn parse(spec: &str) -> Result<AnySource> {
    let (scheme, rest) = spec.split_once("://").ok_or_else(|| anyhow!("source spec must look like scheme://fields, got `{spec}`"))?;
    match scheme {
        "static" => Ok(AnySource::Static(StaticSource::new(parse_static_fields(rest)?, None, Duration::ZERO, Duration::ZERO))),
        "random" => Ok(AnySource::Random(RandomSource::new(parse_random_fields(rest)?, 0, Duration::ZERO, Duration::ZERO))),
        "psana" | "hdf5" => Err(anyhow!("{scheme}:// is a detector-hardware source and is not part of this port")),
        other => Err(anyhow!("unknown source scheme `{other}`")),
    }
}

fn fields(rest: &str) -> impl Iterator<Item = Vec<&str>> {
    rest.split(',').filter(|s| !s.is_empty()).map(|field| field.split(':').collect())
}

fn parse_static_fields(rest: &str) -> Result<BTreeMap<String, FieldSpec>> {
    let mut out = BTreeMap::new();
    for parts in fields(rest) {
        let name = *parts.first().ok_or_else(|| anyhow!("empty field in `{rest}`"))?;
        let spec = match parts.get(1).copied().unwrap_or("scalar") {
            "scalar" => FieldSpec::Scalar,
            "waveform" => FieldSpec::Waveform(parts.get(2).ok_or_else(|| anyhow!("waveform field {name} needs a length"))?.parse()?),
            "image" => {
                let dims = parts.get(2).ok_or_else(|| anyhow!("image field {name} needs RxC dims"))?;
                let (rows, cols) = dims.split_once('x').ok_or_else(|| anyhow!("image dims must be RxC, got {dims}"))?;
                FieldSpec::Image(rows.parse()?, cols.parse()?)
            }
            other => return Err(anyhow!("unknown field kind `{other}` for {name}")),
        };
        out.insert(name.to_string(), spec);
    }
    if out.is_empty() {
        out.insert("a".to_string(), FieldSpec::Scalar);
    }
    Ok(out)
}

fn parse_random_fields(rest: &str) -> Result<BTreeMap<String, RandomFieldSpec>> {
    let mut out = BTreeMap::new();
    for parts in fields(rest) {
        let name = *parts.first().ok_or_else(|| anyhow!("empty field in `{rest}`"))?;
        let spec = match parts.get(1).copied().unwrap_or("scalar") {
            "scalar" => RandomFieldSpec::Scalar {
                min: parts.get(2).unwrap_or(&"0.0").parse()?,
                max: parts.get(3).unwrap_or(&"1.0").parse()?,
            },
            "waveform" => RandomFieldSpec::Waveform {
                len: parts.get(2).ok_or_else(|| anyhow!("waveform field {name} needs a length"))?.parse()?,
                pedestal: parts.get(3).unwrap_or(&"0.0").parse()?,
                width: parts.get(4).unwrap_or(&"1.0").parse()?,
            },
            "image" => {
                let dims = parts.get(2).ok_or_else(|| anyhow!("image field {name} needs RxC dims"))?;
                let (rows, cols) = dims.split_once('x').ok_or_else(|| anyhow!("image dims must be RxC, got {dims}"))?;
                RandomFieldSpec::Image {
                    rows: rows.parse()?,
                    cols: cols.parse()?,
                    pedestal: parts.get(3).unwrap_or(&"0.0").parse()?,
                    width: parts.get(4).unwrap_or(&"1.0").parse()?,
                }
            }
            other => return Err(anyhow!("unknown field kind `{other}` for {name}")),
        };
        out.insert(name.to_string(), spec);
    }
    if out.is_empty() {
        out.insert("a".to_string(), RandomFieldSpec::Scalar { min: 0.0, max: 1.0 });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_static_scalar_field() {
        let source = parse("static://a:scalar").unwrap();
        assert_eq!(source.partition().get("a"), Some(&ElementType::Scalar));
    }

    #[test]
    fn parses_a_random_waveform_field() {
        let source = parse("random://w:waveform:4:0:1").unwrap();
        assert_eq!(source.partition().get("w"), Some(&ElementType::Waveform));
    }

    #[test]
    fn rejects_the_psana_scheme() {
        assert!(parse("psana://detector").is_err());
    }
}
