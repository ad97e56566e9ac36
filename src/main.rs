use std::path::PathBuf;
use std::sync::Arc;

use binsim::config::BinSimConfig;
use binsim::engine::Engine;
use binsim::error::BinSimError;
use binsim::filter_storage::FilterStorage;
use binsim::osc_receiver::OscReceiver;
use binsim::sink::AudioSink;

#[cfg(feature = "cpal-sink")]
use binsim::sink::CpalSink;

fn parse_args() -> (PathBuf, String) {
    let mut args = std::env::args().skip(1);
    let mut config_path = PathBuf::from("binsim.cfg");
    let mut control_addr = "0.0.0.0:10000".to_string();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                if let Some(v) = args.next() {
                    config_path = PathBuf::from(v);
                }
            }
            "--control-addr" => {
                if let Some(v) = args.next() {
                    control_addr = v;
                }
            }
            other => eprintln!("ignoring unrecognized argument: {other}"),
        }
    }

    (config_path, control_addr)
}

fn run() -> Result<(), BinSimError> {
    let (config_path, control_addr) = parse_args();

    let config = if config_path.exists() {
        BinSimConfig::read_from_file(&config_path)?
    } else {
        tracing::warn!(path = %config_path.display(), "no config file found, using defaults");
        BinSimConfig::default()
    };

    tracing::info!(?config, "starting engine");

    let manifest_path = PathBuf::from(&config.filter_list);
    let filters = Arc::new(FilterStorage::load(&manifest_path, config.filter_size, config.block_size)?);
    tracing::info!(filters = filters.len(), "filter table loaded");

    let control = OscReceiver::bind(&control_addr, config.max_channels)
        .map_err(BinSimError::Io)?;
    tracing::info!(addr = %control.local_addr(), "control listener bound");

    let mut engine = Engine::new(&config, filters, control)?;

    #[cfg(feature = "cpal-sink")]
    let mut sink: Box<dyn AudioSink> = match CpalSink::open_default(config.sampling_rate) {
        Ok(sink) => Box::new(sink),
        Err(e) => {
            tracing::warn!(error = %e, "falling back to a null audio sink");
            Box::new(binsim::sink::NullSink::new(config.sampling_rate))
        }
    };
    #[cfg(not(feature = "cpal-sink"))]
    let mut sink: Box<dyn AudioSink> = Box::new(binsim::sink::NullSink::new(config.sampling_rate));

    let running = Arc::new(std::sync::atomic::AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, std::sync::atomic::Ordering::Release))
            .expect("failed to install Ctrl+C handler");
    }

    while running.load(std::sync::atomic::Ordering::Acquire) {
        if let Some(err) = engine.process_block(sink.as_mut()) {
            tracing::warn!(error = %err, "sound source error this block");
        }
    }

    tracing::info!("shutting down");
    engine.close();
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = run() {
        tracing::error!(error = %e, "engine exited with an error");
        std::process::exit(1);
    }
}
