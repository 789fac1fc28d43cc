use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use std::time::Duration;
use telemetry_unit::alarm::{Event, GpsEvent, OdometerEvent};
use telemetry_unit::protocol::lookup;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "8070";
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

const ODOMETER_EVENTS: [(OdometerEvent, &str); 6] = [
    (OdometerEvent::Move, "move"),
    (OdometerEvent::Stop, "stop"),
    (OdometerEvent::OverSpeed, "over-speed"),
    (OdometerEvent::EmergencyBrake, "emergency-brake"),
    (OdometerEvent::SafeSpeed, "safe-speed"),
    (OdometerEvent::Distance, "distance"),
];

const GPS_EVENTS: [(GpsEvent, &str); 2] = [
    (GpsEvent::FixAcquired, "fix-acquired"),
    (GpsEvent::FixLost, "fix-lost"),
];

/// Reply to one command line: the values printed by reads, and whether the
/// unit answered `OK`.
struct Reply {
    values: Vec<String>,
    ok: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("tuctl")
        .version("0.1.0")
        .about("Host-side client for the telemetry unit command port")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("host")
                .short("H")
                .long("host")
                .value_name("HOST")
                .help("Simulator host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Simulator port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("send")
                .about("Send a raw command line, e.g. '+AEB=500+AEB+'")
                .arg(Arg::with_name("line").required(true)),
        )
        .subcommand(
            SubCommand::with_name("get")
                .about("Read one register, e.g. 'GLA' or 'OFP'")
                .arg(Arg::with_name("register").required(true).validator(validate_register)),
        )
        .subcommand(
            SubCommand::with_name("set")
                .about("Write one register, e.g. 'AEB 500'")
                .arg(Arg::with_name("register").required(true).validator(validate_register))
                .arg(Arg::with_name("value").required(true).validator(|v| {
                    v.parse::<u32>()
                        .map(|_| ())
                        .map_err(|_| "value must be an unsigned 32-bit integer".to_string())
                })),
        )
        .subcommand(SubCommand::with_name("events").about("Read and clear the event register"))
        .subcommand(SubCommand::with_name("status").about("Show position, odometer and thresholds"))
        .subcommand(
            SubCommand::with_name("gps")
                .about("Switch the GPS receiver on or off")
                .arg(
                    Arg::with_name("state")
                        .required(true)
                        .possible_values(&["on", "off"]),
                ),
        )
        .subcommand(
            SubCommand::with_name("monitor")
                .about("Enable the monitor line and stream it")
                .arg(
                    Arg::with_name("period")
                        .long("period")
                        .value_name("SECONDS")
                        .takes_value(true)
                        .default_value("1"),
                ),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST).to_string();
    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;
    let addr = format!("{}:{}", host, port);

    match matches.subcommand() {
        ("send", Some(sub)) => handle_send(&addr, sub).await,
        ("get", Some(sub)) => handle_get(&addr, sub).await,
        ("set", Some(sub)) => handle_set(&addr, sub).await,
        ("events", Some(_)) => handle_events(&addr).await,
        ("status", Some(_)) => handle_status(&addr).await,
        ("gps", Some(sub)) => {
            let on = sub.value_of("state") == Some("on");
            let reply = send_line(&addr, if on { "+GPS=1" } else { "+GPS=0" }).await?;
            print_outcome("GPS power", &reply);
            Ok(())
        }
        ("monitor", Some(sub)) => handle_monitor(&addr, sub).await,
        _ => Ok(()),
    }
}

fn validate_register(name: String) -> Result<(), String> {
    let name = name.to_ascii_uppercase();
    let bytes = name.as_bytes();
    if bytes.len() != 3 {
        return Err("register is a class letter plus two attribute letters".to_string());
    }
    lookup(bytes[0], [bytes[1], bytes[2]])
        .map(|_| ())
        .map_err(|e| e.to_string())
}

async fn handle_send(addr: &str, matches: &ArgMatches<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let line = matches.value_of("line").unwrap_or_default();
    let reply = send_line(addr, line).await?;
    for value in &reply.values {
        println!("{}", value.bright_cyan());
    }
    print_outcome("Command line", &reply);
    Ok(())
}

async fn handle_get(addr: &str, matches: &ArgMatches<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let register = matches.value_of("register").unwrap_or_default().to_ascii_uppercase();
    let reply = send_line(addr, &format!("+{}+", register)).await?;
    if reply.ok {
        println!("{} = {}", register.bright_white(), reply.values.join(" ").bright_cyan());
    } else {
        print_outcome(&register, &reply);
    }
    Ok(())
}

async fn handle_set(addr: &str, matches: &ArgMatches<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let register = matches.value_of("register").unwrap_or_default().to_ascii_uppercase();
    let value = matches.value_of("value").unwrap_or_default();
    let reply = send_line(addr, &format!("+{}={}", register, value)).await?;
    if reply.ok {
        println!("{} {} set to {}", "✅".green(), register.bright_white(), value.bright_cyan());
    } else {
        print_outcome(&register, &reply);
    }
    Ok(())
}

async fn handle_events(addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let reply = send_line(addr, "+QER+").await?;
    if !reply.ok {
        print_outcome("Event register", &reply);
        return Ok(());
    }
    let combined: u16 = reply
        .values
        .first()
        .and_then(|v| v.parse().ok())
        .ok_or("malformed event register reply")?;
    let [gps, odometer] = combined.to_be_bytes();

    if combined == 0 {
        println!("{} {}", "✅".green(), "No pending events".bright_green());
        return Ok(());
    }
    for (event, name) in ODOMETER_EVENTS {
        if odometer & Event::from(event).mask() != 0 {
            println!("{} {} {}", "🚩".yellow(), "odometer".bright_white(), name.bright_yellow());
        }
    }
    for (event, name) in GPS_EVENTS {
        if gps & Event::from(event).mask() != 0 {
            println!("{} {} {}", "🚩".yellow(), "gps".bright_white(), name.bright_yellow());
        }
    }
    Ok(())
}

async fn handle_status(addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    const FIELDS: [&str; 12] = [
        "Fix", "Satellites", "HDOP", "Latitude", "Longitude", "Speed km/h", "Course",
        "Pulses", "Frequency", "Over-speed", "Brake", "Distance",
    ];
    let reply = send_line(
        addr,
        "+GFV+GSV+GHL+GLA+GLO+GGS+GTD+OCP+OFP+ASL+AEB+APC+",
    )
    .await?;
    if !reply.ok || reply.values.len() != FIELDS.len() {
        print_outcome("Status", &reply);
        return Ok(());
    }

    println!("{}", "Telemetry unit status".bright_blue().bold());
    for (field, value) in FIELDS.iter().zip(&reply.values) {
        let value = if value == "NA" { value.red() } else { value.bright_cyan() };
        println!("  {:<12} {}", field.bright_white(), value);
    }
    Ok(())
}

async fn handle_monitor(addr: &str, matches: &ArgMatches<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let period: u32 = matches.value_of("period").unwrap_or("1").parse()?;
    let mut stream = connect(addr).await?;
    stream.write_all(format!("+QCM={}\r", period).as_bytes()).await?;

    let mut buffer = vec![0; 1024];
    let mut pending = String::new();
    loop {
        let n = stream.read(&mut buffer).await?;
        if n == 0 {
            return Ok(());
        }
        pending.push_str(&String::from_utf8_lossy(&buffer[..n]));
        while let Some(end) = pending.find("\r\n") {
            let line: String = pending.drain(..end + 2).collect();
            let line = line.trim_end();
            if line.starts_with("0x") && line.len() > 6 {
                let (events, rest) = line.split_at(6);
                let events = if events == "0x0000" { events.green() } else { events.bright_red() };
                println!("{}{}", events, rest.bright_white());
            }
        }
    }
}

async fn connect(addr: &str) -> Result<TcpStream, Box<dyn std::error::Error>> {
    match TcpStream::connect(addr).await {
        Ok(stream) => Ok(stream),
        Err(e) => {
            eprintln!("{} Failed to connect to telemetry unit at {}", "❌".red(), addr.bright_white());
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("{} Simulator is not running. Start it with:", "💡".yellow());
                eprintln!("   {}", "cargo run --bin telemetry-unit".bright_cyan());
            }
            Err(e.into())
        }
    }
}

/// Sends one CR-terminated line and collects the reply up to the `OK` or
/// `ERROR` status line. Monitor lines interleaved with the reply are skipped.
async fn send_line(addr: &str, line: &str) -> Result<Reply, Box<dyn std::error::Error>> {
    let mut stream = connect(addr).await?;

    let exchange = async {
        stream.write_all(line.as_bytes()).await?;
        stream.write_all(b"\r").await?;

        let mut buffer = vec![0; 1024];
        let mut received = String::new();
        loop {
            let n = stream.read(&mut buffer).await?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "simulator closed the connection",
                ));
            }
            received.push_str(&String::from_utf8_lossy(&buffer[..n]));
            if let Some(reply) = parse_reply(&received) {
                return Ok(reply);
            }
        }
    };

    match tokio::time::timeout(RESPONSE_TIMEOUT, exchange).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            eprintln!("{} No reply after {} seconds", "⏰".yellow(), RESPONSE_TIMEOUT.as_secs());
            Err("command timeout".into())
        }
    }
}

fn parse_reply(received: &str) -> Option<Reply> {
    let mut values = Vec::new();
    for line in received.split("\r\n") {
        match line {
            "OK" | "ERROR" => {
                return Some(Reply {
                    values,
                    ok: line == "OK",
                })
            }
            _ if line.starts_with("0x") => {}
            _ => values.extend(line.split_whitespace().map(str::to_string)),
        }
    }
    None
}

fn print_outcome(action: &str, reply: &Reply) {
    if reply.ok {
        println!("{} {}", "✅".green(), format!("{} accepted", action).bright_green());
    } else {
        println!("{} {}", "❌".red(), format!("{} rejected", action).bright_red());
    }
}
