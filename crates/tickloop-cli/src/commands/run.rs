//! Foreground timer runner.
//!
//! Schedules timers from `ID:INTERVAL_MS[:COUNT]` specs on a background
//! registry and pumps callback delivery on the main thread, so every line
//! printed here comes from the dispatch target rather than the driver.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use tickloop_core::{queue, Config, DoneHandler, TickHandler, TimerRegistry};

#[derive(Args)]
pub struct RunArgs {
    /// Timer spec `ID:INTERVAL_MS[:COUNT]`; count 0 or omitted repeats
    /// until interrupted. Repeatable.
    #[arg(long = "timer", value_name = "SPEC", required = true)]
    timers: Vec<String>,
    /// Fire a priming tick for every timer at start
    #[arg(long)]
    immediate: bool,
    /// Emit events as JSON lines
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputLine<'a> {
    Tick {
        id: &'a str,
        runs: u32,
        at: DateTime<Utc>,
    },
    Done {
        id: &'a str,
        at: DateTime<Utc>,
    },
}

fn print_line(json: bool, line: OutputLine<'_>) {
    if json {
        if let Ok(encoded) = serde_json::to_string(&line) {
            println!("{encoded}");
        }
    } else {
        match line {
            OutputLine::Tick { id, runs, .. } => println!("[{id}] tick x{runs}"),
            OutputLine::Done { id, .. } => println!("[{id}] done"),
        }
    }
}

fn parse_spec(
    raw: &str,
    immediate: bool,
) -> Result<(String, tickloop_core::TimerSpec), Box<dyn std::error::Error>> {
    let mut parts = raw.split(':');
    let id = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("invalid timer spec '{raw}': missing id"))?;
    let interval_ms: u64 = parts
        .next()
        .ok_or_else(|| format!("invalid timer spec '{raw}': missing interval"))?
        .parse()?;
    let total_count: u32 = match parts.next() {
        Some(count) => count.parse()?,
        None => 0,
    };
    if parts.next().is_some() {
        return Err(format!("invalid timer spec '{raw}': too many fields").into());
    }
    let mut spec = tickloop_core::TimerSpec::every(interval_ms).times(total_count);
    if immediate {
        spec = spec.fire_immediately();
    }
    Ok((id.to_string(), spec))
}

pub fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let (dispatcher, home) = queue();
    let registry = TimerRegistry::builder(Arc::new(dispatcher))
        .driver_config(config.driver)
        .build()?;

    let pending = Arc::new(AtomicUsize::new(0));
    let mut run_forever = false;

    for raw in &args.timers {
        let (id, spec) = parse_spec(raw, args.immediate)?;
        if spec.total_count == 0 {
            run_forever = true;
        } else {
            pending.fetch_add(1, Ordering::SeqCst);
        }

        let json = args.json;
        let on_tick: TickHandler = Box::new(move |id, runs, _param| {
            print_line(
                json,
                OutputLine::Tick {
                    id,
                    runs,
                    at: Utc::now(),
                },
            );
        });
        let done_pending = Arc::clone(&pending);
        let on_done: DoneHandler = Box::new(move |id, _param| {
            print_line(json, OutputLine::Done { id, at: Utc::now() });
            done_pending.fetch_sub(1, Ordering::SeqCst);
        });
        registry.schedule(&id, spec, Some(on_tick), Some(on_done))?;
    }

    // Deliveries run here, on the main thread. Finite timers decrement
    // `pending` as they complete; forever timers keep pumping until Ctrl-C.
    while run_forever || pending.load(Ordering::SeqCst) > 0 {
        home.pump(Duration::from_millis(100));
    }
    Ok(())
}
