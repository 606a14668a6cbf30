use std::fs;
use std::path::Path;
use std::process::exit;
use std::time::Duration;

use anyhow::anyhow;
use clap::{crate_version, App as ClapApp, Arg, ArgMatches};
use env_logger::Env;

use sourcemeter::protocol::{ScpiRequest, SourceMeterRequest, SourceMeterResponse};
use sourcemeter::{Address, Error, Options, SourceMeter, State};

fn value_arg(name: &'static str, help: &'static str) -> Arg<'static> {
    Arg::with_name(name)
        .index(1)
        .required(true)
        .allow_hyphen_values(true)
        .help(help)
}

fn parse_f64(matches: &ArgMatches, name: &str) -> sourcemeter::Result<f64> {
    let value = matches.value_of(name).unwrap_or_default();
    value
        .parse()
        .map_err(|_| Error::argument(anyhow!("Cannot parse `{}` as a number.", value)))
}

fn request(cmd: &str, matches: &ArgMatches) -> sourcemeter::Result<SourceMeterRequest> {
    let ret = match cmd {
        "init" => SourceMeterRequest::Initialize,
        "terminal" => SourceMeterRequest::SelectTerminal(matches.value_of("terminal").unwrap_or_default().parse()?),
        "source-current" => SourceMeterRequest::SetCurrentSourceMode {
            protection_voltage: parse_f64(matches, "protection")?,
        },
        "source-voltage" => SourceMeterRequest::SetVoltageSourceMode {
            protection_current: parse_f64(matches, "protection")?,
        },
        "set-current" => SourceMeterRequest::SetCurrent(parse_f64(matches, "value")?),
        "set-voltage" => SourceMeterRequest::SetVoltage(parse_f64(matches, "value")?),
        "measure-voltage" => SourceMeterRequest::MeasureVoltage,
        "measure-current" => SourceMeterRequest::MeasureCurrent,
        "measure" => SourceMeterRequest::Measure,
        "enable" => SourceMeterRequest::SetEnabled(Some(true)),
        "disable" => SourceMeterRequest::SetEnabled(Some(false)),
        "status" => SourceMeterRequest::SetEnabled(None),
        "idn" => SourceMeterRequest::Identify,
        "write" => SourceMeterRequest::Scpi(ScpiRequest::Write(
            matches.value_of("command").unwrap_or_default().to_string(),
        )),
        "query" => SourceMeterRequest::Scpi(ScpiRequest::QueryString(
            matches.value_of("command").unwrap_or_default().to_string(),
        )),
        x => return Err(Error::argument(anyhow!("Unknown command `{}`", x))),
    };
    Ok(ret)
}

fn print_response(cmd: &str, response: &SourceMeterResponse, json: bool) -> sourcemeter::Result<()> {
    if json {
        let text = serde_json::to_string(response).map_err(Error::internal)?;
        println!("{}", text);
        return Ok(());
    }
    match response {
        SourceMeterResponse::Done => {}
        SourceMeterResponse::Value(x) if cmd == "measure-voltage" => println!("{} V", x),
        SourceMeterResponse::Value(x) if cmd == "measure-current" => println!("{} A", x),
        SourceMeterResponse::Value(x) => println!("{}", x),
        SourceMeterResponse::Enabled(true) => println!("on"),
        SourceMeterResponse::Enabled(false) => println!("off"),
        SourceMeterResponse::Reading(x) => {
            println!("{} V", x.voltage);
            println!("{} A", x.current);
        }
        SourceMeterResponse::Text(x) => println!("{}", x),
        SourceMeterResponse::Scpi(x) => match x {
            sourcemeter::protocol::ScpiResponse::Done => {}
            sourcemeter::protocol::ScpiResponse::String(x) => println!("{}", x),
        },
    }
    Ok(())
}

fn load_state(path: &Path) -> sourcemeter::Result<Option<State>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read_to_string(path).map_err(Error::transport)?;
    let state = serde_json::from_str(&data)
        .map_err(|x| Error::argument(anyhow!("Invalid state file `{}`: {}", path.display(), x)))?;
    Ok(Some(state))
}

fn save_state(path: &Path, state: &State) -> sourcemeter::Result<()> {
    let data = serde_json::to_string_pretty(state).map_err(Error::internal)?;
    fs::write(path, data).map_err(Error::transport)
}

fn run(matches: &ArgMatches) -> sourcemeter::Result<()> {
    let (cmd, sub_matches) = matches
        .subcommand()
        .ok_or_else(|| Error::argument(anyhow!("No command given")))?;
    let req = request(cmd, sub_matches)?;

    let mut options = match matches.value_of("options") {
        Some(path) => Options::load(path)?,
        None => Options::default(),
    };
    if matches.is_present("no-ramp") {
        options.curr_step = None;
        options.volt_step = None;
    }
    options.validate()?;

    let timeout = matches.value_of("timeout-ms").unwrap_or("3000");
    let timeout: u64 = timeout
        .parse()
        .map_err(|_| Error::argument(anyhow!("Cannot parse `{}` as a timeout.", timeout)))?;
    let address = Address::parse(matches.value_of("address").unwrap_or("loopback"))?;
    log::info!("Connecting to {}", address);
    let transport = address.open(Duration::from_millis(timeout))?;
    let mut smu = SourceMeter::new(transport, options);

    let state_file = matches.value_of("state").map(Path::new);
    if let Some(path) = state_file {
        if let Some(state) = load_state(path)? {
            log::info!("Restoring state from {}", path.display());
            smu.restore(state);
        }
    }

    let ret = smu.handle(req);

    // keep the cache in sync with whatever reached the instrument, even on failure
    if let Some(path) = state_file {
        save_state(path, &smu.snapshot())?;
    }
    print_response(cmd, &ret?, matches.is_present("json"))
}

fn main() {
    let matches = ClapApp::new("Keithley 2400 SourceMeter")
        .version(crate_version!())
        .about("Control a Keithley 2400 SourceMeter over SCPI")
        .arg(
            Arg::with_name("address")
                .long("address")
                .short('a')
                .takes_value(true)
                .default_value("loopback")
                .help("Instrument address, e.g. `tcp::192.168.0.20:5025` or `prologix::192.168.0.21:1234::24`"),
        )
        .arg(Arg::with_name("verbose").long("verbose").short('v').help("Log verbose output"))
        .arg(
            Arg::with_name("timeout-ms")
                .long("timeout-ms")
                .takes_value(true)
                .default_value("3000")
                .help("Socket timeout in milliseconds"),
        )
        .arg(
            Arg::with_name("state")
                .long("state")
                .takes_value(true)
                .help("JSON file holding the driver state between invocations"),
        )
        .arg(
            Arg::with_name("options")
                .long("options")
                .takes_value(true)
                .help("JSON file with protection limits and ramp steps"),
        )
        .arg(Arg::with_name("no-ramp").long("no-ramp").help("Jump to setpoints instead of ramping"))
        .arg(Arg::with_name("json").long("json").help("Print responses as JSON"))
        .subcommand(ClapApp::new("init").about("Reset the instrument and apply protection limits"))
        .subcommand(
            ClapApp::new("terminal")
                .about("Select the output terminals")
                .arg(value_arg("terminal", "`front` or `rear`")),
        )
        .subcommand(
            ClapApp::new("source-current")
                .about("Source current and sense voltage")
                .arg(value_arg("protection", "Protection voltage in V")),
        )
        .subcommand(
            ClapApp::new("source-voltage")
                .about("Source voltage and sense current")
                .arg(value_arg("protection", "Protection current in A")),
        )
        .subcommand(
            ClapApp::new("set-current")
                .about("Set the current setpoint")
                .arg(value_arg("value", "Current in A")),
        )
        .subcommand(
            ClapApp::new("set-voltage")
                .about("Set the voltage setpoint")
                .arg(value_arg("value", "Voltage in V")),
        )
        .subcommand(ClapApp::new("measure-voltage").about("Measure the output voltage"))
        .subcommand(ClapApp::new("measure-current").about("Measure the output current"))
        .subcommand(ClapApp::new("measure").about("Measure voltage and current"))
        .subcommand(ClapApp::new("enable").about("Turn the output on"))
        .subcommand(ClapApp::new("disable").about("Ramp to zero and turn the output off"))
        .subcommand(ClapApp::new("status").about("Print whether the output is on"))
        .subcommand(ClapApp::new("idn").about("Print the instrument identification"))
        .subcommand(
            ClapApp::new("write")
                .about("Send a raw SCPI command")
                .arg(value_arg("command", "SCPI command")),
        )
        .subcommand(
            ClapApp::new("query")
                .about("Send a raw SCPI query and print the reply")
                .arg(value_arg("command", "SCPI query")),
        )
        .get_matches();

    let verbose = matches.is_present("verbose");
    if verbose {
        env_logger::Builder::from_env(Env::default().default_filter_or("sourcemeter=debug")).init();
    } else {
        env_logger::Builder::from_env(Env::default().default_filter_or("sourcemeter=warn")).init();
    }

    if let Err(err) = run(&matches) {
        eprintln!("error: {}", err);
        exit(1);
    }
}
