//! Centralite Panel Monitor
//!
//! Connects to a panel, subscribes to every configured device and prints
//! each event as a JSON line. Without a port it runs against a simulated
//! panel that generates random activity.
//!
//! Usage:
//!   cargo run --example panel_monitor -- [OPTIONS] [PORT]
//!
//! Options:
//!   --config FILE     Panel config (JSON)
//!   --tcp HOST:PORT   Connect to a serial-over-TCP bridge instead
//!   --seconds N       Stop after N seconds (default: run until killed)

use anyhow::Context;
use centralite_core::prelude::*;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut config = PanelConfig::default();
    let mut tcp_addr: Option<String> = None;
    let mut seconds: Option<u64> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                let path = args.get(i).context("--config needs a file")?;
                config = PanelConfig::from_file(path)?;
            }
            "--tcp" => {
                i += 1;
                tcp_addr = Some(args.get(i).context("--tcp needs HOST:PORT")?.clone());
            }
            "--seconds" => {
                i += 1;
                let value = args.get(i).context("--seconds needs a number")?;
                seconds = Some(value.parse().context("--seconds needs a number")?);
            }
            port => config.link.port_name = port.to_string(),
        }
        i += 1;
    }

    let mut simulated = None;
    let engine = if let Some(addr) = &tcp_addr {
        ProtocolEngine::open_tcp(addr, config.engine.clone())?
    } else if !config.link.port_name.is_empty() {
        ProtocolEngine::open_serial(&config.link, config.engine.clone())?
    } else {
        println!("No port given, using a simulated panel");
        let panel = SimulatedPanel::new();
        simulated = Some(panel.clone());
        ProtocolEngine::new(Box::new(panel), config.engine.clone())?
    };

    let print = |event: &PanelEvent| -> anyhow::Result<()> {
        println!("{}", serde_json::to_string(event)?);
        Ok(())
    };
    let roster = &config.roster;
    for id in roster.active_loads() {
        engine.subscribe_load_change(id, print);
    }
    for id in roster.active_switches() {
        engine.subscribe_pressed(id, print);
        engine.subscribe_released(id, print);
    }

    let states = engine.query_all_load_states()?;
    let on = states.values().filter(|&&on| on).count();
    println!("{} of {} loads on", on, states.len());

    let started = Instant::now();
    while seconds.map_or(true, |s| started.elapsed() < Duration::from_secs(s)) {
        if let Some(panel) = &simulated {
            panel.emit_random_activity();
        }
        thread::sleep(Duration::from_millis(500));
    }

    let stats = engine.stats();
    println!(
        "Sent {} commands, {} replies, {} timeouts",
        stats.commands_sent, stats.replies_received, stats.reply_timeouts
    );
    engine.close();
    Ok(())
}
