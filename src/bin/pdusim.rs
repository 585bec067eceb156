use clap::{App, Arg};

use pdusim::config::{Config, RunMode, DEFAULT_BIND_PORT, DEFAULT_RS422_BAUD};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("pdusim")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("Dual PDU simulator/emulator for the flight avionics testbed")
        .arg(
            Arg::with_name("mode")
                .long("mode")
                .value_name("MODE")
                .help("Run mode")
                .takes_value(true)
                .possible_values(&["simulator", "emulator"])
                .default_value("simulator"),
        )
        .arg(
            Arg::with_name("tcp-ip")
                .long("tcp-ip")
                .value_name("IP")
                .help("Bind address for the OBC command socket")
                .takes_value(true)
                .default_value("127.0.0.1"),
        )
        .arg(
            Arg::with_name("tcp-port")
                .long("tcp-port")
                .value_name("PORT")
                .help("Bind port for the OBC command socket")
                .takes_value(true)
                .validator(|v| v.parse::<u16>().map(|_| ()).map_err(|e| e.to_string())),
        )
        .arg(
            Arg::with_name("rs422-port")
                .long("rs422-port")
                .value_name("DEVICE")
                .help("Serial device of the RS422 link (e.g. /dev/ttyUSB0); omit to disable")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("rs422-baud")
                .long("rs422-baud")
                .value_name("BAUD")
                .help("Baud rate of the RS422 link")
                .takes_value(true)
                .validator(|v| v.parse::<u32>().map(|_| ()).map_err(|e| e.to_string())),
        )
        .get_matches();

    let mut config = Config::default();
    if let Some(mode) = matches.value_of("mode") {
        config.mode = mode.parse::<RunMode>()?;
    }
    if let Some(ip) = matches.value_of("tcp-ip") {
        config.bind_ip = ip.parse()?;
    }
    config.bind_port = matches
        .value_of("tcp-port")
        .map(str::parse)
        .transpose()?
        .unwrap_or(DEFAULT_BIND_PORT);
    config.rs422_port = matches.value_of("rs422-port").map(str::to_string);
    config.rs422_baud = matches
        .value_of("rs422-baud")
        .map(str::parse)
        .transpose()?
        .unwrap_or(DEFAULT_RS422_BAUD);

    println!("PDU Simulator/Emulator");
    println!("  mode:     {:?}", config.mode);
    println!("  command:  udp://{}", config.bind_addr());
    match &config.rs422_port {
        Some(port) => println!("  rs422:    {} @ {} baud", port, config.rs422_baud),
        None => println!("  rs422:    disabled"),
    }

    // Bind/open refusals surface here and exit non-zero
    pdusim::supervisor::run(config).await?;
    Ok(())
}
