use clap::{App, Arg};
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry_unit::hal::{Clock, PinBank};
use telemetry_unit::{Device, DeviceConfig, Port, PulseCounter};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::time;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: &str = "8070";
const HOST_BROADCAST_BUFFER_SIZE: usize = 256;

type SharedDevice = Arc<Mutex<Device<SystemClock, PinBank>>>;

/// Milliseconds since start-up, truncated to 32 bits like a hardware tick
/// counter.
#[derive(Debug, Clone, Copy)]
struct SystemClock {
    start: Instant,
}

impl Clock for SystemClock {
    fn millis(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("telemetry-unit")
        .version("0.1.0")
        .about("Vehicle telemetry unit simulator: host UART over TCP, NMEA replay and odometer pulses")
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("TCP port playing the host UART")
                .takes_value(true)
                .default_value(DEFAULT_PORT),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON device configuration")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("nmea")
                .short("n")
                .long("nmea")
                .value_name("FILE")
                .help("NMEA log replayed on the GPS UART, one sentence per line")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("nmea-interval")
                .long("nmea-interval")
                .value_name("MS")
                .help("Delay between replayed sentences")
                .takes_value(true)
                .default_value("200"),
        )
        .arg(
            Arg::with_name("pulse-hz")
                .long("pulse-hz")
                .value_name("HZ")
                .help("Simulated odometer pulse rate")
                .takes_value(true)
                .default_value("0"),
        )
        .arg(
            Arg::with_name("tick")
                .long("tick")
                .value_name("MS")
                .help("Cooperative loop period")
                .takes_value(true)
                .default_value("10"),
        )
        .arg(
            Arg::with_name("monitor")
                .short("m")
                .long("monitor")
                .value_name("SECONDS")
                .help("Monitor line period, overrides the configuration (0 disables)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("log-level")
                .short("l")
                .long("log-level")
                .value_name("LEVEL")
                .help("Tracing filter, e.g. info or telemetry_unit=debug")
                .takes_value(true)
                .default_value("info"),
        )
        .get_matches();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(matches.value_of("log-level").unwrap_or("info")))
        .init();

    let mut config = match matches.value_of("config") {
        Some(path) => DeviceConfig::load(path)?,
        None => DeviceConfig::default(),
    };
    if let Some(period) = matches.value_of("monitor") {
        config.monitor_period_s = period.parse()?;
    }
    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;
    let tick_ms: u64 = matches.value_of("tick").unwrap_or("10").parse()?;
    let pulse_hz: u64 = matches.value_of("pulse-hz").unwrap_or("0").parse()?;
    let nmea_interval: u64 = matches.value_of("nmea-interval").unwrap_or("200").parse()?;

    let clock = SystemClock { start: Instant::now() };
    let device = Device::new(&config, clock, PinBank::new());
    let pulses = device.pulse_counter();
    let device: SharedDevice = Arc::new(Mutex::new(device));

    let (host_tx, _) = broadcast::channel::<String>(HOST_BROADCAST_BUFFER_SIZE);

    let server = tokio::spawn(start_tcp_server(Arc::clone(&device), host_tx.clone(), port));

    if let Some(path) = matches.value_of("nmea") {
        let sentences = tokio::fs::read_to_string(path).await?;
        info!(path, lines = sentences.lines().count(), "replaying NMEA log");
        tokio::spawn(replay_nmea(
            Arc::clone(&device),
            sentences,
            Duration::from_millis(nmea_interval.max(1)),
        ));
    }

    if pulse_hz > 0 {
        info!(pulse_hz, "simulating odometer pulses");
        tokio::spawn(generate_pulses(pulses, pulse_hz));
    }

    let mut interval = time::interval(Duration::from_millis(tick_ms.max(1)));
    let mut line_asserted = false;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }

        let (output, asserted) = {
            let mut device = device.lock().await;
            device.tick();
            (device.take_host_output(), device.pins().interrupt_asserted())
        };

        if asserted != line_asserted {
            info!(asserted, "interrupt line changed");
            line_asserted = asserted;
        }
        // With nobody listening the UART just drops the bytes.
        if !output.is_empty() && host_tx.send(output.to_string()).is_err() {
            debug!(bytes = output.len(), "no host connected, output dropped");
        }
    }

    server.abort();
    Ok(())
}

async fn start_tcp_server(device: SharedDevice, host_tx: broadcast::Sender<String>, port: u16) {
    let listener = match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("cannot bind host port {}: {}", port, e);
            return;
        }
    };
    info!(port, "host UART listening");

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!(%addr, "host connected");
                let client_device = Arc::clone(&device);
                let client_rx = host_tx.subscribe();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, client_device, client_rx).await {
                        warn!(%addr, "host connection error: {}", e);
                    }
                    info!(%addr, "host disconnected");
                });
            }
            Err(e) => error!("failed to accept connection: {}", e),
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    device: SharedDevice,
    mut host_rx: broadcast::Receiver<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (mut reader, mut writer) = stream.into_split();

    let forward = tokio::spawn(async move {
        loop {
            match host_rx.recv().await {
                Ok(output) => {
                    if let Err(e) = writer.write_all(output.as_bytes()).await {
                        warn!("failed to forward host output: {}", e);
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "slow host, output dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut buffer = [0u8; 256];
    let mut previous = 0u8;
    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        // Terminals send bare LF; the unit only understands CR.
        let mut bytes = Vec::with_capacity(n);
        for &byte in &buffer[..n] {
            if byte == b'\n' && previous != b'\r' {
                bytes.push(b'\r');
            } else {
                bytes.push(byte);
            }
            previous = byte;
        }
        device.lock().await.receive(Port::Host, &bytes);
    }

    forward.abort();
    Ok(())
}

async fn replay_nmea(device: SharedDevice, log: String, period: Duration) {
    let sentences: Vec<&str> = log
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('$'))
        .collect();
    if sentences.is_empty() {
        warn!("NMEA log holds no sentences");
        return;
    }

    let mut interval = time::interval(period);
    for sentence in sentences.iter().cycle() {
        interval.tick().await;
        let mut device = device.lock().await;
        device.receive(Port::Gps, sentence.as_bytes());
        device.receive(Port::Gps, b"\r\n");
    }
}

async fn generate_pulses(pulses: Arc<PulseCounter>, pulse_hz: u64) {
    const STEP_MS: u64 = 10;
    let mut interval = time::interval(Duration::from_millis(STEP_MS));
    let mut carry = 0u64;
    loop {
        interval.tick().await;
        carry += pulse_hz * STEP_MS;
        for _ in 0..carry / 1000 {
            pulses.increment();
        }
        carry %= 1000;
    }
}
