//! Simulation configuration.
//!
//! Every setting can come from a `GRIDRELAY_*` environment variable; unset
//! variables keep the defaults.
//!
//! | Variable | Default |
//! |---|---|
//! | `GRIDRELAY_ROWS`, `GRIDRELAY_COLS` | 3, 3 |
//! | `GRIDRELAY_START_ID` | 10 |
//! | `GRIDRELAY_ORIGINATOR` | start id |
//! | `GRIDRELAY_EPSILON` | 1 |
//! | `GRIDRELAY_STEP` | 2 |
//! | `GRIDRELAY_PRECISION_SHIFT` | 9 |
//! | `GRIDRELAY_INITIAL_VALUE` | 2 |
//! | `GRIDRELAY_MAX_RETRANSMISSIONS` | 4 |
//! | `GRIDRELAY_HISTORY_CAPACITY` | 4 |
//! | `GRIDRELAY_TARGET` | unset (identity update) |
//! | `GRIDRELAY_DATA_LOSS`, `GRIDRELAY_ACK_LOSS` | 0.0, 0.0 |
//! | `GRIDRELAY_RETRANSMIT_MS` | 50 |
//! | `GRIDRELAY_HOP_DELAY_MS` | 5 |
//! | `GRIDRELAY_TICK_MS` | 4000 |
//! | `GRIDRELAY_DEADLINE_MS` | 60000 |
//! | `GRIDRELAY_SEED` | 0 |

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use gridrelay_protocol::ProtocolConfig;
use gridrelay_topology::NodeAddress;

use crate::error::{Error, Result};
use crate::runtime::DEFAULT_TICK_INTERVAL;
use crate::transport::LinkConfig;

/// Everything needed to run a grid simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub protocol: ProtocolConfig,
    pub link: LinkConfig,
    /// Minimizer of the per-node quadratic. `None` runs the identity update.
    pub target: Option<f64>,
    pub tick_interval: Duration,
    /// Give up waiting for convergence after this long. A 1×1 grid never
    /// starts a relay and always runs to this deadline.
    pub deadline: Duration,
    /// Seed for link loss decisions
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolConfig::default(),
            link: LinkConfig::default(),
            target: None,
            tick_interval: DEFAULT_TICK_INTERVAL,
            deadline: Duration::from_secs(60),
            seed: 0,
        }
    }
}

impl SimulationConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`, which maps a variable name
    /// to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let p = &defaults.protocol;

        let rows = parse(&lookup, "GRIDRELAY_ROWS", p.rows)?;
        let cols = parse(&lookup, "GRIDRELAY_COLS", p.cols)?;
        let start_id = parse(&lookup, "GRIDRELAY_START_ID", p.start_id)?;
        let mut protocol = ProtocolConfig::default().with_grid(rows, cols, start_id);

        if let Some(originator) = parse_opt::<u16, _>(&lookup, "GRIDRELAY_ORIGINATOR")? {
            protocol = protocol.with_originator(NodeAddress(originator));
        }
        protocol = protocol
            .with_epsilon(parse(&lookup, "GRIDRELAY_EPSILON", p.epsilon)?)
            .with_step(parse(&lookup, "GRIDRELAY_STEP", p.step)?)
            .with_precision_shift(parse(&lookup, "GRIDRELAY_PRECISION_SHIFT", p.precision_shift)?)
            .with_initial_value(parse(&lookup, "GRIDRELAY_INITIAL_VALUE", p.initial_value)?)
            .with_max_retransmissions(parse(
                &lookup,
                "GRIDRELAY_MAX_RETRANSMISSIONS",
                p.max_retransmissions,
            )?)
            .with_history_capacity(parse(&lookup, "GRIDRELAY_HISTORY_CAPACITY", p.history_capacity)?);

        let link = LinkConfig {
            data_loss: parse(&lookup, "GRIDRELAY_DATA_LOSS", defaults.link.data_loss)?,
            ack_loss: parse(&lookup, "GRIDRELAY_ACK_LOSS", defaults.link.ack_loss)?,
            retransmit_interval: parse_millis(
                &lookup,
                "GRIDRELAY_RETRANSMIT_MS",
                defaults.link.retransmit_interval,
            )?,
            hop_delay: parse_millis(&lookup, "GRIDRELAY_HOP_DELAY_MS", defaults.link.hop_delay)?,
        };

        let config = Self {
            protocol,
            link,
            target: parse_opt(&lookup, "GRIDRELAY_TARGET")?,
            tick_interval: parse_millis(&lookup, "GRIDRELAY_TICK_MS", defaults.tick_interval)?,
            deadline: parse_millis(&lookup, "GRIDRELAY_DEADLINE_MS", defaults.deadline)?,
            seed: parse(&lookup, "GRIDRELAY_SEED", defaults.seed)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the protocol and link settings.
    pub fn validate(&self) -> Result<()> {
        self.protocol.validate()?;
        self.link.validate()?;
        if let Some(target) = self.target {
            if !target.is_finite() {
                return Err(Error::Config(format!("target must be finite, got {}", target)));
            }
        }
        Ok(())
    }
}

fn parse_opt<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{}={:?}: {}", key, raw, e))),
    }
}

fn parse<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_opt(lookup, key)?.unwrap_or(default))
}

fn parse_millis<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_opt::<u64, _>(lookup, key)?
        .map(Duration::from_millis)
        .unwrap_or(default))
}
