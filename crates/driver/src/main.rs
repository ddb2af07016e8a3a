//! stm32leds
//!
//! Drives the LEDs of an STM32F4 Discovery board and reads its user button
//! counter. Attaches the board through the USB worker, opens its device
//! node, and writes one command frame.

use anyhow::{Context, Result, anyhow, bail};
use clap::{Arg, ArgAction, ArgMatches, Command, CommandFactory, FromArgMatches, Parser};
use common::{UsbBridge, UsbCommand, UsbEvent, create_usb_bridge, setup_logging};
use driver::config::{self, DriverConfig};
use driver::registry::node_name;
use driver::usb::spawn_usb_worker;
use driver::{DeviceFile, DeviceRegistry};
use protocol::CommandFrame;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Parser, Debug)]
#[command(name = "stm32leds")]
#[command(author, version, about = "Control the LEDs of an STM32F4 Discovery board")]
#[command(long_about = "
Sets the four user LEDs of an STM32F4 Discovery board running the LED
firmware, or reads how often its blue user button was pressed.

EXAMPLES:
    # Red, green and blue on; orange off
    stm32leds -rgb

    # All LEDs off
    stm32leds -f

    # Leave the LEDs alone and print the button press count
    stm32leds -s

    # List attached boards
    stm32leds --list-devices

CONFIGURATION:
    Configuration files are looked up in the following order:
    1. Path specified with --config
    2. ~/.config/stm32leds/driver.toml
    3. /etc/stm32leds/driver.toml
    4. Built-in defaults
")]
struct Args {
    /// Device node to open
    #[arg(short = 'd', long, value_name = "NODE")]
    device: Option<String>,

    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List attached boards and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// How long to wait for the board to attach
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    wait_secs: u64,

    /// LED and status letters in command-line order
    #[arg(skip)]
    letters: String,
}

/// Single-letter flags that build the command frame, in getopt style
const LETTER_FLAGS: [(char, &str); 7] = [
    ('r', "Red LED (LED5)"),
    ('g', "Green LED (LED4)"),
    ('b', "Blue LED (LED6)"),
    ('o', "Orange LED (LED3)"),
    ('a', "All LEDs on"),
    ('f', "All LEDs off"),
    ('s', "Leave the LEDs unchanged and print the button press count"),
];

fn cli() -> Command {
    let letters = LETTER_FLAGS.into_iter().map(|(letter, help)| {
        Arg::new(letter.to_string())
            .short(letter)
            .help(help)
            .action(ArgAction::Count)
            .display_order(0)
    });
    Args::command().args(letters)
}

impl Args {
    fn from_matches(matches: &ArgMatches) -> std::result::Result<Self, clap::Error> {
        let mut args = Self::from_arg_matches(matches)?;

        let mut seen: Vec<(usize, char)> = Vec::new();
        for (letter, _) in LETTER_FLAGS {
            if let Some(indices) = matches.indices_of(letter.to_string().as_str()) {
                seen.extend(indices.map(|index| (index, letter)));
            }
        }
        seen.sort_unstable();
        args.letters = seen.into_iter().map(|(_, letter)| letter).collect();

        Ok(args)
    }

    /// The frame the letter flags describe, applied left to right
    fn frame(&self) -> Result<CommandFrame> {
        CommandFrame::from_letters(&self.letters).context("Invalid LED flags")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::from_matches(&cli().get_matches()).unwrap_or_else(|e| e.exit());

    if args.save_config {
        let config = DriverConfig::default();
        let path = DriverConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        config::load_config(path).context("Failed to load configuration")?
    } else {
        DriverConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.driver.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("stm32leds v{}", env!("CARGO_PKG_VERSION"));

    let registry = Arc::new(DeviceRegistry::new(
        config.driver.node_prefix.clone(),
        config.transfer_timeouts(),
    ));
    let (usb_bridge, worker) = create_usb_bridge();
    let usb_worker_handle = spawn_usb_worker(worker, registry.clone(), config.usb_settings())
        .context("Failed to spawn USB worker thread")?;

    let result = if args.list_devices {
        list_devices_mode(&usb_bridge, args.wait_secs).await
    } else {
        let node = args
            .device
            .clone()
            .unwrap_or_else(|| format!("{}0", config.driver.node_prefix));
        run_command(&args, &registry, &usb_bridge, &node).await
    };

    info!("Shutting down USB subsystem...");
    if let Err(e) = shutdown_usb_worker(&usb_bridge).await {
        error!("Error shutting down USB worker: {:#}", e);
    }
    match usb_worker_handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("USB worker failed: {}", e),
        Err(e) => error!("USB worker thread panicked: {:?}", e),
    }

    result
}

/// Send the frame described by the flags, and print the counter for `-s`
async fn run_command(
    args: &Args,
    registry: &Arc<DeviceRegistry>,
    usb_bridge: &UsbBridge,
    node: &str,
) -> Result<()> {
    wait_for_node(registry, usb_bridge, node, Duration::from_secs(args.wait_secs)).await?;

    let file = registry.open_node(node).map_err(|e| {
        eprintln!("open: {}", e);
        anyhow!("could not open {}", node)
    })?;

    let frame = args.frame()?;
    let read_back = frame.request_count;
    let node = node.to_string();

    tokio::task::spawn_blocking(move || exchange(file, frame, read_back, &node))
        .await
        .context("I/O task failed")?
}

/// Blocking file I/O on the opened node
fn exchange(file: DeviceFile, frame: CommandFrame, read_back: bool, node: &str) -> Result<()> {
    debug!("Sending {:?} to {}", frame, node);

    let outcome = file.send(&frame).and_then(|_| {
        if read_back {
            let report = file.read_report()?;
            println!("Blue button was pressed {} times", report.press_count());
        }
        Ok(())
    });
    file.close();

    outcome.map_err(|e| {
        eprintln!("could not complete I/O on {}: {}", node, e);
        anyhow!("I/O on {} failed", node)
    })
}

/// Wait until `node` has been attached by the USB worker
async fn wait_for_node(
    registry: &DeviceRegistry,
    usb_bridge: &UsbBridge,
    node: &str,
    timeout: Duration,
) -> Result<()> {
    let wanted = node_name(node);

    let waited = tokio::time::timeout(timeout, async {
        loop {
            if registry.sessions().iter().any(|s| s.node == wanted) {
                return Ok::<(), common::Error>(());
            }
            match usb_bridge.recv_event().await? {
                UsbEvent::DeviceAttached { key, node } => {
                    info!("{} attached as {}", key, node);
                }
                UsbEvent::AttachFailed { key, reason } => {
                    error!("Could not attach {}: {}", key, reason);
                }
                UsbEvent::DeviceDetached { key } => {
                    info!("{} detached", key);
                }
            }
        }
    })
    .await;

    match waited {
        Ok(result) => result.context("USB worker stopped"),
        Err(_) => bail!("{} did not appear within {:?}", node, timeout),
    }
}

/// Print attached sessions and exit
async fn list_devices_mode(usb_bridge: &UsbBridge, wait_secs: u64) -> Result<()> {
    // Give enumeration a moment to emit its attach events
    let _ = tokio::time::timeout(Duration::from_secs(wait_secs.min(1)), usb_bridge.recv_event()).await;

    let (tx, rx) = tokio::sync::oneshot::channel();
    usb_bridge
        .send_command(UsbCommand::ListSessions { response: tx })
        .await
        .context("Failed to send ListSessions command")?;

    let sessions = rx.await.context("Failed to receive session list")?;

    if sessions.is_empty() {
        println!("No boards attached.");
    } else {
        println!("Found {} board(s):\n", sessions.len());
        for session in sessions {
            println!(
                "  {}  {}  {}  refs={}  presses={}",
                session.node, session.key, session.state, session.references, session.press_count
            );
        }
    }

    Ok(())
}

async fn shutdown_usb_worker(usb_bridge: &UsbBridge) -> Result<()> {
    usb_bridge
        .send_command(UsbCommand::Shutdown)
        .await
        .context("Failed to send Shutdown command")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{MockTransport, stm32leds_interface};
    use common::DeviceKey;
    use protocol::LedMask;

    fn parse(flags: &[&str]) -> Args {
        let mut argv = vec!["stm32leds"];
        argv.extend_from_slice(flags);
        Args::from_matches(&cli().get_matches_from(argv)).unwrap()
    }

    #[test]
    fn test_combined_led_flags() {
        let frame = parse(&["-rgb"]).frame().unwrap();
        assert_eq!(frame.leds, LedMask::RED | LedMask::GREEN | LedMask::BLUE);
        assert!(!frame.request_count);

        let frame = parse(&["-r", "-o"]).frame().unwrap();
        assert_eq!(frame.leds, LedMask::RED | LedMask::ORANGE);
    }

    #[test]
    fn test_status_leaves_leds() {
        let frame = parse(&["-rs"]).frame().unwrap();
        assert_eq!(frame, CommandFrame::query_press_count());
    }

    #[test]
    fn test_off_and_all() {
        assert_eq!(parse(&["-f"]).frame().unwrap().leds, LedMask::OFF);
        assert_eq!(parse(&["-a"]).frame().unwrap().leds, LedMask::ALL);
        assert_eq!(parse(&[]).frame().unwrap().leds, LedMask::OFF);
    }

    #[test]
    fn test_letters_apply_in_order() {
        assert_eq!(parse(&["-fr"]).frame().unwrap().leds, LedMask::RED);
        assert_eq!(parse(&["-rf"]).frame().unwrap().leds, LedMask::OFF);
        assert_eq!(parse(&["-f", "-g"]).frame().unwrap().leds, LedMask::GREEN);
        assert_eq!(parse(&["-rfr"]).letters, "rfr");

        let frame = parse(&["-sf"]).frame().unwrap();
        assert!(frame.request_count);
        assert_eq!(frame.leds, LedMask::OFF);
    }

    #[tokio::test]
    async fn test_wait_for_node_accepts_dev_paths() {
        let registry = DeviceRegistry::default();
        registry
            .attach(DeviceKey::new(1, 4, 0), &stm32leds_interface(), MockTransport::new())
            .unwrap();
        let (bridge, _worker) = create_usb_bridge();
        let timeout = Duration::from_millis(300);

        for node in ["stm32leds0", "/dev/stm32leds0", "/dev/usb/stm32leds0"] {
            wait_for_node(&registry, &bridge, node, timeout).await.unwrap();
        }
        assert!(
            wait_for_node(&registry, &bridge, "/dev/usb/stm32leds1", timeout)
                .await
                .is_err()
        );
    }
}
