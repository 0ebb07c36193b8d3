//! # ADS-over-MQTT CLI
//!
//! Command-line utilities for building and inspecting ADS frames offline.

use ads_mqtt_proto::index::{codes, DEFAULT_PLC_PORT};
use ads_mqtt_proto::types::{decode_value, DEFAULT_STRING_WIDTH};
use ads_mqtt_proto::{AdsRequest, AdsResponse, AdsType, AmsAddr, AmsNetId, Command, FrameLayout};
use anyhow::{Context, Result};
use serde_json::json;
use std::env;

/// AMS port used as the frame source.
const SOURCE_PORT: u16 = 32905;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "netid" => {
            if args.len() < 3 {
                eprintln!("Usage: ads-mqtt netid <net-id>");
                std::process::exit(1);
            }
            let net_id: AmsNetId = args[2].parse().context("Invalid net id")?;
            println!("{net_id} ({})", hex::encode(net_id.bytes()));
        }
        "read-frame" => {
            if args.len() < 7 {
                eprintln!(
                    "Usage: ads-mqtt read-frame <target> <source> <index-group> <index-offset> <length> [legacy]"
                );
                std::process::exit(1);
            }
            let target: AmsNetId = args[2].parse().context("Invalid target net id")?;
            let source: AmsNetId = args[3].parse().context("Invalid source net id")?;
            let request = AdsRequest::Read {
                index_group: parse_number(&args[4]).context("Invalid index group")?,
                index_offset: parse_number(&args[5]).context("Invalid index offset")?,
                length: parse_number(&args[6]).context("Invalid length")?,
            };
            let frame = request.encode(
                AmsAddr::new(target, DEFAULT_PLC_PORT),
                AmsAddr::new(source, SOURCE_PORT),
                1,
                layout_arg(args.get(7))?,
            );
            println!("{}", hex::encode(frame));
        }
        "decode" => {
            if args.len() < 3 {
                eprintln!("Usage: ads-mqtt decode <hex-frame> [legacy]");
                std::process::exit(1);
            }
            let frame = hex::decode(args[2].trim()).context("Frame is not valid hex")?;
            let response = AdsResponse::parse(&frame, layout_arg(args.get(3))?)
                .context("Failed to parse response frame")?;
            let report = json!({
                "invoke_id": response.invoke_id(),
                "command": Command::from_id(response.header.command)
                    .map_or_else(|| format!("{:#06x}", response.header.command), |c| c.to_string()),
                "source": response.header.source.to_string(),
                "target": response.header.target.to_string(),
                "result": response.result,
                "result_name": codes::name(response.result),
                "data": hex::encode(&response.data),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        "value" => {
            if args.len() < 4 {
                eprintln!("Usage: ads-mqtt value <type> <hex-bytes>");
                std::process::exit(1);
            }
            if AdsType::lookup(&args[2], DEFAULT_STRING_WIDTH).is_none() {
                eprintln!("Unknown type {}, showing raw bytes", args[2]);
            }
            let bytes = hex::decode(args[3].trim()).context("Value is not valid hex")?;
            let value = decode_value(Some(args[2].as_str()), &bytes).context("Failed to decode value")?;
            println!("{}", value.to_json());
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Parse a decimal or `0x` prefixed hexadecimal number.
fn parse_number(input: &str) -> Result<u32> {
    let input = input.trim();
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(digits) => u32::from_str_radix(digits, 16),
        None => input.parse(),
    };
    parsed.with_context(|| format!("'{input}' is not a number"))
}

fn layout_arg(arg: Option<&String>) -> Result<FrameLayout> {
    match arg {
        None => Ok(FrameLayout::Plain),
        Some(name) => Ok(name.parse()?),
    }
}

fn print_help() {
    println!(
        r#"ADS-over-MQTT CLI

USAGE:
    ads-mqtt <COMMAND> [OPTIONS]

COMMANDS:
    netid <net-id>                          Validate an AMS net id
    read-frame <target> <source> <group> <offset> <length> [legacy]
                                            Build a Read request frame as hex
    decode <hex-frame> [legacy]             Decode a response frame
    value <type> <hex-bytes>                Decode value bytes by PLC type name
    help                                    Show this help message

EXAMPLES:
    ads-mqtt netid 5.80.201.232.1.1
    ads-mqtt read-frame 5.80.201.232.1.1 10.0.0.7.1.1 0xF00C 0 24
    ads-mqtt value INT feff
"#
    );
}
