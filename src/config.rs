//! Operator policy: named setups keyed by monitor identifier.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::output::Output;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shell command run after the layout changed.
    pub background_command: String,
    pub default_extend_direction: String,
    /// Settle delay before the first pass, in Go duration syntax.
    pub wait: String,
    /// Also treat udev DRM change events as hotplug notifications.
    pub drm_hotplug: bool,
    pub setups: BTreeMap<String, SetupConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SetupConfig {
    pub outputs: Vec<OutputConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub monitor: String,
    pub position: Position,
    pub primary: bool,
    pub disable_on_lid_close: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

/// Where outputs without a configured position are attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendDirection {
    Right,
    Left,
    Bottom,
    Top,
}

impl FromStr for ExtendDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "right" => Ok(ExtendDirection::Right),
            "left" => Ok(ExtendDirection::Left),
            "bottom" => Ok(ExtendDirection::Bottom),
            "top" => Ok(ExtendDirection::Top),
            other => Err(Error::InvalidConfiguration(format!(
                "invalid default extend direction: {other}"
            ))),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path)?;
        Config::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Config> {
        let config: Config = serde_yaml::from_str(text)?;
        // Surface a malformed delay now rather than after subscribing to events.
        config.wait()?;
        Ok(config)
    }

    pub fn wait(&self) -> Result<Duration> {
        parse_duration(&self.wait)
    }

    pub fn extend_direction(&self) -> Result<ExtendDirection> {
        self.default_extend_direction.parse()
    }

    /// Name of the setup matching the most present monitors.
    ///
    /// Setups naming an absent monitor never match. Equal scores go to the
    /// setup whose name sorts first.
    pub fn find_best_setup(&self, outputs: &[Output]) -> Option<&str> {
        let mut best: Option<(&str, usize)> = None;
        for (name, setup) in &self.setups {
            let score = setup.score(outputs);
            if score > best.map_or(0, |(_, s)| s) {
                best = Some((name.as_str(), score));
            }
        }
        best.map(|(name, _)| name)
    }

    /// Placement of `monitor_id` within `setup`, if the setup names it.
    pub fn output_config(&self, setup: Option<&str>, monitor_id: &str) -> Option<&OutputConfig> {
        if monitor_id.is_empty() {
            return None;
        }
        self.setups
            .get(setup?)?
            .outputs
            .iter()
            .find(|oc| oc.monitor == monitor_id)
    }

    pub fn disable_on_lid_close(&self, setup: Option<&str>, monitor_id: &str) -> bool {
        self.output_config(setup, monitor_id)
            .is_some_and(|oc| oc.disable_on_lid_close)
    }
}

impl SetupConfig {
    /// Number of entries, or 0 as soon as one of them is not present.
    pub fn score(&self, outputs: &[Output]) -> usize {
        let present = |monitor: &str| {
            !monitor.is_empty()
                && outputs
                    .iter()
                    .any(|o| o.connection.is_connected() && o.monitor_id == monitor)
        };
        if self.outputs.iter().all(|oc| present(&oc.monitor)) {
            self.outputs.len()
        } else {
            0
        }
    }
}

/// Parses Go `time.ParseDuration` syntax such as `2s`, `1m30s` or `1.5h`.
///
/// The empty string is a zero duration.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let invalid = || Error::InvalidConfiguration(format!("invalid duration: {s:?}"));

    let s = s.trim();
    if s.is_empty() || s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if number_len == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..number_len].parse().map_err(|_| invalid())?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let seconds = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" | "μs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.,
            "m" => 60.,
            "h" => 3600.,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];

        total += value * seconds;
    }

    Duration::try_from_secs_f64(total).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Connection;

    const CONFIG: &str = r#"
background_command: "echo changed"
default_extend_direction: left
wait: 1m30s
setups:
  docked:
    outputs:
      - monitor: AAA-1-1
        position: { x: 0, y: 0 }
        primary: true
      - monitor: BBB-2-2
        position: { x: 1920, y: 0 }
  laptop:
    outputs:
      - monitor: AAA-1-1
        disable_on_lid_close: true
"#;

    fn output(id: u32, monitor_id: &str) -> Output {
        Output {
            id,
            name: format!("OUT-{id}"),
            connection: Connection::Connected,
            monitor_id: monitor_id.to_owned(),
            crtc: None,
            crtcs: Vec::new(),
            modes: Vec::new(),
            num_preferred: 0,
            mm_height: 0,
        }
    }

    #[test]
    fn parses_full_config() {
        let config = Config::parse(CONFIG).unwrap();
        assert_eq!(config.background_command, "echo changed");
        assert_eq!(config.extend_direction().unwrap(), ExtendDirection::Left);
        assert_eq!(config.wait().unwrap(), Duration::from_secs(90));
        assert!(!config.drm_hotplug);
        assert_eq!(config.setups.len(), 2);
        assert_eq!(
            config.setups["docked"].outputs[1],
            OutputConfig {
                monitor: "BBB-2-2".to_owned(),
                position: Position { x: 1920, y: 0 },
                primary: false,
                disable_on_lid_close: false,
            }
        );
    }

    #[test]
    fn empty_config_is_valid() {
        let config = Config::parse("{}").unwrap();
        assert_eq!(config.wait().unwrap(), Duration::ZERO);
        assert_eq!(config.extend_direction().unwrap(), ExtendDirection::Right);
        assert!(config.setups.is_empty());
    }

    #[test]
    fn malformed_wait_is_rejected_at_load() {
        assert!(matches!(
            Config::parse("wait: soon"),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn unknown_extend_direction() {
        let config = Config::parse("default_extend_direction: diagonal").unwrap();
        assert!(matches!(
            config.extend_direction(),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn go_durations() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("1h1m").unwrap(), Duration::from_secs(3660));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("3 days").is_err());
    }

    #[test]
    fn setup_with_absent_monitor_scores_zero() {
        let config = Config::parse(CONFIG).unwrap();
        let outputs = [output(1, "AAA-1-1")];
        assert_eq!(config.setups["docked"].score(&outputs), 0);
        assert_eq!(config.setups["laptop"].score(&outputs), 1);
        assert_eq!(config.find_best_setup(&outputs), Some("laptop"));
    }

    #[test]
    fn disconnected_monitor_is_absent() {
        let config = Config::parse(CONFIG).unwrap();
        let mut hdmi = output(2, "BBB-2-2");
        hdmi.connection = Connection::Disconnected;
        let outputs = [output(1, "AAA-1-1"), hdmi];
        assert_eq!(config.find_best_setup(&outputs), Some("laptop"));
    }

    #[test]
    fn most_specific_setup_wins() {
        let config = Config::parse(CONFIG).unwrap();
        let outputs = [output(1, "AAA-1-1"), output(2, "BBB-2-2")];
        assert_eq!(config.find_best_setup(&outputs), Some("docked"));
    }

    #[test]
    fn no_setup_without_identifiers() {
        let config = Config::parse(CONFIG).unwrap();
        let outputs = [output(1, ""), output(2, "")];
        assert_eq!(config.find_best_setup(&outputs), None);
        assert!(config.output_config(Some("laptop"), "").is_none());
    }

    #[test]
    fn equal_scores_pick_first_name() {
        let config = Config::parse(
            r#"
setups:
  zeta:
    outputs: [{ monitor: AAA-1-1 }]
  alpha:
    outputs: [{ monitor: AAA-1-1, primary: true }]
"#,
        )
        .unwrap();
        let outputs = [output(1, "AAA-1-1")];
        for _ in 0..8 {
            assert_eq!(config.find_best_setup(&outputs), Some("alpha"));
        }
    }

    #[test]
    fn lid_policy_lookup() {
        let config = Config::parse(CONFIG).unwrap();
        assert!(config.disable_on_lid_close(Some("laptop"), "AAA-1-1"));
        assert!(!config.disable_on_lid_close(Some("docked"), "AAA-1-1"));
        assert!(!config.disable_on_lid_close(None, "AAA-1-1"));
    }
}
