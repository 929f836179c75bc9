// Keyboard teleop: WASD move, Z/X rotate, R/F speed, T field-relative,
// Space lock, G zero gyro, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::info;

use swerve_zenoh_runtime::config::TOPIC_CMD_DRIVE;
use swerve_zenoh_runtime::messages::DriveIntent;

const AXIS_LEVELS: [f64; 3] = [0.25, 0.5, 1.0]; // fraction of full stick
const INPUT_TIMEOUT_MS: u64 = 100; // Release the stick after this much time with no input

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD_DRIVE).await?;

    info!("Controls: WASD=move, Z/X=rotate, R/F=speed, T=field-relative, Space=lock, G=zero gyro, Q=quit");
    info!("Speed: LOW");

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut level: usize = 0;
    let mut intent = DriveIntent::default();
    let mut last_movement_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;
                let axis = AXIS_LEVELS[level];

                match code {
                    KeyCode::Char('w') if pressed => intent.x = axis,
                    KeyCode::Char('s') if pressed => intent.x = -axis,
                    KeyCode::Char('a') if pressed => intent.y = axis,
                    KeyCode::Char('d') if pressed => intent.y = -axis,
                    KeyCode::Char('z') if pressed => intent.twist = axis,
                    KeyCode::Char('x') if pressed => intent.twist = -axis,
                    KeyCode::Char(' ') if pressed => intent.lock = true,

                    KeyCode::Char('g') if pressed => {
                        intent.zero_gyro = true;
                        info!("Zeroing gyro");
                    }
                    KeyCode::Char('t') if pressed => {
                        intent.field_relative = !intent.field_relative;
                        info!(
                            "Frame: {}",
                            if intent.field_relative { "field" } else { "robot" }
                        );
                    }

                    // Speed control
                    KeyCode::Char('r') if pressed => {
                        level = (level + 1).min(AXIS_LEVELS.len() - 1);
                        print_speed(level);
                    }
                    KeyCode::Char('f') if pressed => {
                        level = level.saturating_sub(1);
                        print_speed(level);
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }

                if pressed && matches!(code, KeyCode::Char('w' | 'a' | 's' | 'd' | 'z' | 'x' | ' ')) {
                    last_movement_input = Instant::now();
                }
            }
        }

        // Release the stick if no movement input for INPUT_TIMEOUT_MS
        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            intent.x = 0.0;
            intent.y = 0.0;
            intent.twist = 0.0;
            intent.lock = false;
        }

        // Always publish at ~50Hz
        publisher.put(serde_json::to_string(&intent)?).await?;
        intent.zero_gyro = false;
    }

    Ok(())
}

fn print_speed(level: usize) {
    let label = ["LOW", "MED", "HIGH"][level];
    info!("Speed: {}", label);
}
