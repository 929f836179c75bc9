// 50 Hz loop with watchdog
// Note: if the command publisher dies, the watchdog stops the drivetrain
// instead of letting it run on the last intent it heard.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

use crate::config::{
    CMD_TIMEOUT, ConfigError, DriveConfig, LOOP_HZ, TICK_PERIOD, TOPIC_CMD_DRIVE, TOPIC_HEALTH, TOPIC_POSE,
    TOPIC_TELEMETRY, TOPIC_VISION,
};
use crate::messages::{DriveIntent, PoseMessage, RuntimeHealth, VisionMeasurement};
use crate::sim::SimDrivetrain;
use crate::swerve::{DriveError, Drivetrain};
use crate::telemetry::{FaultLog, FrameSink, TelemetryValue};

/// Command line options for `run`
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config_path: PathBuf,
    /// Force closed-loop drive velocity regardless of the file
    pub closed_loop: bool,
}

/// What one tick produced, ready to publish
#[derive(Debug, Clone)]
pub struct TickOutput {
    pub health: RuntimeHealth,
    pub pose: Option<PoseMessage>,
    pub telemetry: BTreeMap<String, TelemetryValue>,
}

pub struct Runtime {
    drivetrain: Drivetrain,
    /// Simulated hardware behind the drivetrain, stepped once per tick
    sim: Option<SimDrivetrain>,
    latest_intent: Option<DriveIntent>,
    cmd_received_at: Instant,
    health: RuntimeHealth,
    started: Instant,
    frame: Arc<Mutex<FrameSink>>,
    faults: Arc<Mutex<FaultLog>>,
}

impl Runtime {
    pub fn new(config: Result<DriveConfig, ConfigError>, closed_loop: bool, now: Instant) -> Self {
        let config = config.map(|mut config| {
            config.chassis.closed_loop |= closed_loop;
            config
        });

        let frame = Arc::new(Mutex::new(FrameSink::new()));
        let faults = Arc::new(Mutex::new(FaultLog::new()));
        let mut sim = None;
        let drivetrain = Drivetrain::build(
            config,
            |config| {
                let backend = SimDrivetrain::new(config)?;
                let hardware = backend.hardware();
                sim = Some(backend);
                Ok(hardware)
            },
            Box::new(frame.clone()),
            Box::new(faults.clone()),
        );

        let health = if drivetrain.is_active() {
            RuntimeHealth::CmdStale // Start stale until first cmd
        } else {
            RuntimeHealth::Disabled
        };

        Self {
            drivetrain,
            sim,
            latest_intent: None,
            cmd_received_at: now,
            health,
            started: now,
            frame,
            faults,
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    fn elapsed(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.started).as_secs_f64()
    }

    /// Process incoming command
    pub fn on_command(&mut self, intent: DriveIntent, now: Instant) {
        self.latest_intent = Some(intent);
        self.cmd_received_at = now;
    }

    /// Hand a vision pose to odometry, stamped with its capture time
    pub fn on_vision(&mut self, msg: VisionMeasurement, now: Instant) {
        let timestamp = self.elapsed(now) - msg.latency_s;
        if let Some(drive) = self.drivetrain.coordinator_mut() {
            // Rejections are already logged by the coordinator
            let _ = drive.add_vision_measurement(msg.pose, timestamp);
        }
    }

    /// Run one control tick: odometry, watchdog, intent, simulation
    pub fn tick(&mut self, now: Instant) -> TickOutput {
        let timestamp = self.elapsed(now);
        let cmd_age = now.saturating_duration_since(self.cmd_received_at);

        let Some(drive) = self.drivetrain.coordinator_mut() else {
            self.health = RuntimeHealth::Disabled;
            return TickOutput {
                health: self.health,
                pose: None,
                telemetry: BTreeMap::new(),
            };
        };

        // Sensors and odometry first, so this tick's commands use this tick's pose
        drive.periodic(timestamp);

        let health = match self.latest_intent.as_mut() {
            Some(intent) if cmd_age <= CMD_TIMEOUT => {
                let result = drive.apply_intent(intent);
                // One-shot requests must not repeat on the next tick
                intent.zero_gyro = false;
                intent.reset_pose = None;
                match result {
                    Ok(_) => RuntimeHealth::Ok,
                    Err(DriveError::CalibrationInProgress) => RuntimeHealth::Calibrating,
                }
            }
            _ => {
                // Watchdog triggered (or no command ever received) - stop the robot
                if self.health == RuntimeHealth::Ok {
                    warn!("Command stale ({:?} old), stopping drivetrain", cmd_age);
                }
                drive.stop();
                RuntimeHealth::CmdStale
            }
        };

        let pose = PoseMessage::new(drive.pose(), timestamp);

        if let Some(sim) = &self.sim {
            sim.step(TICK_PERIOD.as_secs_f64());
        }

        if health != self.health {
            info!("Runtime health: {:?} -> {:?}", self.health, health);
        }
        self.health = health;

        let telemetry = self
            .frame
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain();
        TickOutput {
            health,
            pose: Some(pose),
            telemetry,
        }
    }

    /// Names of faults raised so far
    pub fn fault_names(&self) -> Vec<String> {
        self.faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .faults()
            .iter()
            .map(|f| f.name.clone())
            .collect()
    }
}

pub async fn run(options: RunOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = DriveConfig::load(&options.config_path);
    let mut runtime = Runtime::new(config, options.closed_loop, Instant::now());
    if runtime.health() == RuntimeHealth::Disabled {
        warn!("Drivetrain disabled, faults: {:?}", runtime.fault_names());
    }

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_cmd = session.declare_subscriber(TOPIC_CMD_DRIVE).await?;
    let sub_vision = session.declare_subscriber(TOPIC_VISION).await?;
    let pub_telemetry = session.declare_publisher(TOPIC_TELEMETRY).await?;
    let pub_pose = session.declare_publisher(TOPIC_POSE).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut tick = interval(TICK_PERIOD);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {}, {}", TOPIC_CMD_DRIVE, TOPIC_VISION);
    info!("Publishing to: {}, {}, {}", TOPIC_TELEMETRY, TOPIC_POSE, TOPIC_HEALTH);

    loop {
        tick.tick().await;

        // 1. Drain all pending commands (non-blocking), keep latest
        while let Ok(Some(sample)) = sub_cmd.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<DriveIntent>(&payload) {
                Ok(intent) => runtime.on_command(intent, Instant::now()),
                Err(e) => warn!("Failed to parse drive intent: {}", e),
            }
        }

        // 2. Vision measurements are all fused, in arrival order
        while let Ok(Some(sample)) = sub_vision.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<VisionMeasurement>(&payload) {
                Ok(msg) => runtime.on_vision(msg, Instant::now()),
                Err(e) => warn!("Failed to parse vision measurement: {}", e),
            }
        }

        // 3. Drive (includes watchdog logic)
        let output = runtime.tick(Instant::now());

        // 4. Publish
        if !output.telemetry.is_empty() {
            pub_telemetry.put(serde_json::to_string(&output.telemetry)?).await?;
        }
        if let Some(pose) = output.pose {
            pub_pose.put(serde_json::to_string(&pose)?).await?;
        }
        pub_health.put(serde_json::to_string(&output.health)?).await?;
    }
}
