//! Send command - a small device simulator that publishes one or more
//! AMQP messages to a gateway endpoint and reports each disposition.

use crate::amqp::client::SenderClient;
use crate::amqp::frames::DeliveryState;
use crate::amqp::value::AmqpValue;
use crate::cli::args::SendArgs;
use anyhow::{Context, Result};
use std::io::Read;
use std::net::SocketAddr;

pub fn run_send(args: SendArgs) -> Result<()> {
    let body = match args.body {
        Some(body) => body.into_bytes(),
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("reading message body from stdin")?;
            buf
        }
    };
    let properties: Vec<(AmqpValue, AmqpValue)> = parse_properties(&args.properties)?
        .into_iter()
        .map(|(k, v)| (AmqpValue::String(k), AmqpValue::String(v)))
        .collect();
    let addr: SocketAddr = args
        .address
        .parse()
        .with_context(|| format!("invalid address {:?}", args.address))?;

    let mut client = SenderClient::connect(addr)?;
    client.open_link(&args.endpoint)?;

    let mut accepted = 0u32;
    for _ in 0..args.count {
        let state = client.send(Some(&properties), &body)?;
        match state {
            DeliveryState::Accepted => accepted += 1,
            DeliveryState::Rejected(condition) => {
                let detail = condition
                    .map(|c| format!("{}: {}", c.condition, c.description.unwrap_or_default()))
                    .unwrap_or_else(|| "no condition".to_string());
                eprintln!("rejected ({detail})");
            }
            DeliveryState::Released => eprintln!("released"),
        }
    }
    client.close()?;
    println!("{accepted}/{} accepted", args.count);
    Ok(())
}

fn parse_properties(raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .with_context(|| format!("property {pair:?} is not KEY=VALUE"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties_split_on_first_equals() {
        let parsed = parse_properties(&["temp=21".into(), "note=a=b".into()]).expect("parse");
        assert_eq!(parsed[0], ("temp".to_string(), "21".to_string()));
        assert_eq!(parsed[1], ("note".to_string(), "a=b".to_string()));
    }

    #[test]
    fn property_without_equals_is_an_error() {
        assert!(parse_properties(&["broken".into()]).is_err());
    }
}
