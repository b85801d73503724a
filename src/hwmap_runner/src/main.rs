use std::{
    io::{self, BufReader},
    path::PathBuf,
    time::Duration,
};

use clap::{Parser, Subcommand};
use hwmap::{
    board::UnmapFailures,
    jitter::{self, JitterConfig},
    rt::{self, RtPolicy, SchedError},
    timing::ClockKind,
    window::DEV_MEM,
    workload::SyntheticWorkload,
    AccessPolicy, Board, BoardSource, CancelToken, MapError, RunConfig, RunError,
};
use thiserror::Error;

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("hwmap=info,hwmap_runner=info"),
    )
    .init();

    if let Err(e) = main_inner() {
        log::error!("Command failed.\n{:?}", e);
        std::process::exit(1);
    }
}

#[derive(Error, Debug)]
enum MainError {
    #[error("Could not map the board's windows.")]
    Map(#[source] MapError),
    #[error("The run failed.")]
    Run(#[source] RunError),
    #[error("Could not unmap the board's windows.")]
    Unmap(#[source] UnmapFailures),
    #[error("Could not query or change the processor affinity.")]
    Affinity(#[source] SchedError),
}

/// Drives the GPIO and FPGA peripherals of the board from three cooperating
/// real-time tasks
#[derive(Parser)]
#[command(version)]
struct Opt {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Perform a run
    Run(RunOpt),
    /// Measure the wake-up latency of a periodic sleep
    Jitter(JitterOpt),
    /// Show or change the processor affinity of this thread
    Affinity(AffinityOpt),
}

#[derive(clap::Args)]
struct RunOpt {
    /// Use an in-process store instead of the hardware
    #[arg(long)]
    simulate: bool,
    /// The physical memory device
    #[arg(long, default_value = DEV_MEM, conflicts_with = "simulate")]
    dev_mem: PathBuf,
    /// Run the output and dependent tasks only, stopping at the threshold
    #[arg(long)]
    two_task: bool,
    /// Stop once the shared counter reaches this value
    #[arg(long, default_value = "30")]
    threshold: u32,
    /// Wake the dependent task every N counts
    #[arg(long, default_value = "5")]
    signal_every: u32,
    /// Don't touch the measurement task's scheduling
    #[arg(long)]
    no_rt: bool,
    /// The fixed priority of the measurement task
    #[arg(long, default_value = "99", conflicts_with = "no_rt")]
    priority: i32,
    /// The processor the measurement task is bound to
    #[arg(long, default_value = "1", conflicts_with = "no_rt")]
    cpu: usize,
    /// Time intervals with the wall clock instead of the monotonic clock
    #[arg(long)]
    realtime_clock: bool,
    /// Don't serialize read-modify-write register accesses
    #[arg(long)]
    unsynchronized: bool,
    /// Shorten every interval to a few milliseconds
    #[arg(long)]
    fast: bool,
    /// The duration of the timed workload in microseconds
    #[arg(long, default_value = "2000")]
    workload_us: u64,
}

#[derive(clap::Args)]
struct JitterOpt {
    /// The requested sleep duration in milliseconds
    #[arg(long, default_value = "50")]
    wait_ms: u64,
    /// The number of wake-ups to measure (0 means until Enter is pressed)
    #[arg(long, default_value = "100")]
    iterations: u64,
    /// Use the fixed-priority policy and lock memory
    #[arg(long)]
    rt: bool,
}

#[derive(clap::Args)]
struct AffinityOpt {
    /// Bind this thread to the given processor
    #[arg(long)]
    pin: Option<usize>,
    /// The number of processors to report
    #[arg(long, default_value = "2")]
    show: usize,
}

fn main_inner() -> anyhow::Result<()> {
    let opt = Opt::parse();
    match opt.command {
        Command::Run(opt) => run(opt),
        Command::Jitter(opt) => jitter(opt),
        Command::Affinity(opt) => affinity(opt),
    }
}

fn run(opt: RunOpt) -> anyhow::Result<()> {
    let mut config = if opt.fast {
        RunConfig::fast()
    } else {
        RunConfig::default()
    };
    config.measurement.threshold = opt.threshold;
    config.output.signal_every = opt.signal_every;
    config.rt = if opt.no_rt {
        RtPolicy::NONE
    } else {
        RtPolicy {
            priority: Some(opt.priority),
            processor: Some(opt.cpu),
            lock_memory: true,
        }
    };
    if opt.realtime_clock {
        config.clock = ClockKind::Realtime;
    }
    if opt.unsynchronized {
        config.access = AccessPolicy::Unsynchronized;
    }
    if opt.two_task {
        config = config.two_task();
    }
    log::debug!("config = {:?}", config);

    let source = if opt.simulate {
        BoardSource::Simulated
    } else {
        BoardSource::DevMem(opt.dev_mem)
    };
    let board = Board::open(&source, config.access).map_err(MainError::Map)?;

    let workload = SyntheticWorkload::new(Duration::from_micros(opt.workload_us));
    let result = hwmap::run(&board, &config, workload);

    // Unmap even if the run failed
    let unmapped = board.unmap();
    let report = result.map_err(MainError::Run)?;
    unmapped.map_err(MainError::Unmap)?;

    for (i, nanos) in report.samples.iter().enumerate() {
        println!("interval {i}: {nanos}");
    }
    match report.stats {
        Some(stats) => println!("{stats}"),
        None => println!("no intervals recorded"),
    }

    Ok(())
}

fn jitter(opt: JitterOpt) -> anyhow::Result<()> {
    let mut config = JitterConfig {
        wait: Duration::from_millis(opt.wait_ms),
        iterations: (opt.iterations != 0).then_some(opt.iterations),
        ..JitterConfig::default()
    };
    if opt.rt {
        config = config.high_priority();
        log::info!("using the fixed-priority policy");
    }

    let token = CancelToken::new();
    if config.iterations.is_none() {
        log::info!("press Enter to stop");
        jitter::cancel_on_enter(token.clone(), BufReader::new(io::stdin()))?;
    }

    let stats = jitter::probe(&config, &token, |stats| {
        log::debug!("{stats}");
    });
    println!("{stats}");
    println!("iteration count = {}", stats.count);
    Ok(())
}

fn affinity(opt: AffinityOpt) -> anyhow::Result<()> {
    let show = |when: &str| -> Result<(), MainError> {
        let cpus = rt::processor_affinity().map_err(MainError::Affinity)?;
        println!("{when}:");
        for i in 0..opt.show {
            let set = if cpus.contains(&i) { "set" } else { "not set" };
            println!("  CPU {i} is {set} in hard affinity");
        }
        Ok(())
    };

    show("current affinity")?;

    if let Some(cpu) = opt.pin {
        log::info!("binding to processor {cpu}");
        rt::pin_to_processor(cpu).map_err(MainError::Affinity)?;
        show("after binding")?;
    }

    if let Some(cpu) = rt::current_processor() {
        println!("running on CPU {cpu}");
    }
    let range = rt::priority_range();
    println!(
        "fixed priorities range from {} to {}",
        range.start(),
        range.end()
    );
    Ok(())
}
