//! Diagnostic listing of every platform and its devices. Selects nothing.

use crate::backend::{Backend, DeviceType};
use crate::config::DiscoveryConfig;
use crate::Result;
use log::debug;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformReport {
    pub vendor: String,
    pub devices: Vec<String>,
}

/// Renders one `platform <i>: vendor '<vendor>'` line per platform, each
/// followed by its `  device <j>: '<name>'` lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery(pub Vec<PlatformReport>);

impl fmt::Display for Discovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, platform) in self.0.iter().enumerate() {
            writeln!(f, "platform {}: vendor '{}'", i, platform.vendor)?;
            for (j, device) in platform.devices.iter().enumerate() {
                writeln!(f, "  device {}: '{}'", j, device)?;
            }
        }
        Ok(())
    }
}

pub fn discover<B: Backend>(backend: &B, config: &DiscoveryConfig) -> Result<Discovery> {
    let platforms = backend.platforms()?;
    debug!("Found {} platform(s)", platforms.len());

    let mut reports = Vec::with_capacity(platforms.len());
    for platform in platforms {
        let vendor = truncate_name(backend.platform_vendor(platform)?, config.max_name_len);
        let devices = backend
            .devices(platform, DeviceType::All)?
            .into_iter()
            .map(|device| {
                let name = backend.device_name(device)?;
                Ok(truncate_name(name, config.max_name_len))
            })
            .collect::<Result<Vec<_>>>()?;
        reports.push(PlatformReport { vendor, devices });
    }
    Ok(Discovery(reports))
}

/// Fits `name` into a buffer of `capacity` bytes, one of them reserved for the
/// terminator. Never splits a UTF-8 sequence.
fn truncate_name(mut name: String, capacity: usize) -> String {
    let max = capacity.saturating_sub(1);
    if name.len() > max {
        let mut end = max;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_keeps_room_for_terminator() {
        assert_eq!(truncate_name("GPU0".into(), 1000), "GPU0");
        assert_eq!(truncate_name("GPU0".into(), 4), "GPU");
        assert_eq!(truncate_name("GPU0".into(), 0), "");
        // 'é' is two bytes and must not be split.
        assert_eq!(truncate_name("aé".into(), 3), "a");
    }

    #[test]
    fn display_format() {
        let report = Discovery(vec![
            PlatformReport {
                vendor: "Acme".into(),
                devices: vec!["GPU0".into(), "CPU".into()],
            },
            PlatformReport {
                vendor: "Empty Inc".into(),
                devices: vec![],
            },
        ]);
        assert_eq!(
            report.to_string(),
            "platform 0: vendor 'Acme'\n  device 0: 'GPU0'\n  device 1: 'CPU'\n\
             platform 1: vendor 'Empty Inc'\n",
        );
    }
}
