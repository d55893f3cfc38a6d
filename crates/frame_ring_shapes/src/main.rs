pub mod demo_error;
pub mod headless_scene;
pub mod scene_data;
#[cfg(windows)]
pub mod win32;

use demo_error::DemoResult;
use frame_ring::SampleCommandLine;
use tracing::error;
use tracing::info;

pub fn main() -> DemoResult<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt::SubscriberBuilder::default()
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .with_target(false)
        .init();

    let command_line = SampleCommandLine::from_env();
    info!(?command_line, "Starting shapes sample");

    let result = run(&command_line);
    if let Err(report) = &result {
        error!("{report}");
        #[cfg(windows)]
        if !command_line.headless {
            win32::show_fatal_error(report);
        }
    }
    result
}

fn run(command_line: &SampleCommandLine) -> DemoResult<()> {
    #[cfg(windows)]
    if !command_line.headless {
        return win32::run(command_line);
    }
    headless_scene::run(command_line)
}
