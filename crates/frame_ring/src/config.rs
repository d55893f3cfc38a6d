use std::time::Duration;

use tracing::warn;

use crate::timeline::WaitPolicy;

pub const DEFAULT_HEADLESS_FRAMES: u64 = 300;

/// Options shared by the samples. Arguments may start with `-` or `/` and
/// are matched case-insensitively; anything unrecognised is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleCommandLine {
    pub use_warp_device: bool,
    pub headless: bool,
    pub frames: u64,
    pub wait_policy: WaitPolicy,
}

impl Default for SampleCommandLine {
    fn default() -> Self {
        Self {
            use_warp_device: false,
            headless: false,
            frames: DEFAULT_HEADLESS_FRAMES,
            wait_policy: WaitPolicy::Infinite,
        }
    }
}

impl SampleCommandLine {
    pub fn from_env() -> Self {
        Self::parse(std::env::args().skip(1))
    }

    pub fn parse<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut command_line = Self::default();
        for arg in args {
            let arg = arg.as_ref();
            let Some(option) = arg.strip_prefix('-').or_else(|| arg.strip_prefix('/')) else {
                continue;
            };
            let (name, value) = match option.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (option, None),
            };

            if name.eq_ignore_ascii_case("warp") {
                command_line.use_warp_device = true;
            } else if name.eq_ignore_ascii_case("headless") {
                command_line.headless = true;
            } else if name.eq_ignore_ascii_case("frames") {
                match value.map(str::parse::<u64>) {
                    Some(Ok(frames)) => command_line.frames = frames,
                    _ => warn!(arg, "Ignoring malformed frame count"),
                }
            } else if name.eq_ignore_ascii_case("wait-timeout-ms") {
                match value.map(str::parse::<u64>) {
                    Some(Ok(0)) => command_line.wait_policy = WaitPolicy::Infinite,
                    Some(Ok(millis)) => {
                        command_line.wait_policy = WaitPolicy::Bounded(Duration::from_millis(millis))
                    }
                    _ => warn!(arg, "Ignoring malformed wait timeout"),
                }
            }
        }
        command_line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_arguments() {
        assert_eq!(
            SampleCommandLine::parse(Vec::<String>::new()),
            SampleCommandLine::default()
        );
    }

    #[test]
    fn warp_accepts_both_prefixes_in_any_case() {
        assert!(SampleCommandLine::parse(["-warp"]).use_warp_device);
        assert!(SampleCommandLine::parse(["/WARP"]).use_warp_device);
        assert!(!SampleCommandLine::parse(["warp"]).use_warp_device);
    }

    #[test]
    fn values_are_parsed() {
        let command_line =
            SampleCommandLine::parse(["-headless", "-frames=12", "/Wait-Timeout-Ms=250", "-bogus"]);
        assert!(command_line.headless);
        assert_eq!(command_line.frames, 12);
        assert_eq!(
            command_line.wait_policy,
            WaitPolicy::Bounded(Duration::from_millis(250))
        );
    }

    #[test]
    fn malformed_values_keep_defaults() {
        let command_line = SampleCommandLine::parse(["-frames=lots", "-wait-timeout-ms"]);
        assert_eq!(command_line.frames, DEFAULT_HEADLESS_FRAMES);
        assert_eq!(command_line.wait_policy, WaitPolicy::Infinite);
    }
}
