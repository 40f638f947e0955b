//! swarm: spread transaction submissions over many egress routes.
//!
//! thin orchestration: config -> wire -> bootstrap -> run -> report

use std::env;
use std::sync::Arc;
use swarm_core::{assemble, Config, LogSink, SimBuilder, SimLedger};
use swarm_dispatch::DispatchReport;

const USAGE: &str = "\
usage: swarm (--routes FILE | --route a,b,..) --identities a,b,.. [options]

  --target N               logical submissions (SWARM_TARGET, default 100)
  --concurrency N          workers in flight (SWARM_CONCURRENCY, default 150)
  --min-interval-ms MS     per-route dispatch spacing (default 1000)
  --jitter-ms MS           random extra spacing (default 100)
  --max-failures N         failures before a route is demoted (default 3)
  --reinstate-after-ms MS  retry demoted routes after MS (default off)
  --max-retries N          attempts per submission (default 5)
  --confirm-depth N        wait for N confirmations after acceptance
  --fail-rate P            simulated transient failure probability
  --dead a,b               simulated egresses that always fail
  --latency-ms MS          simulated send latency
  --json                   print the report as json";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_logger();

    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        eprintln!("{}", USAGE);
        return;
    }

    let config = match Config::from_args(&args, |name| env::var(name).ok()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[swarm] {}", e);
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    };

    eprintln!("[swarm] starting");
    eprintln!(
        "[swarm] routes={} identities={} target={} cap={}",
        config.routes.len(),
        config.identities.len(),
        config.target,
        config.dispatcher.concurrency
    );
    eprintln!(
        "[swarm] interval={:?} jitter={:?} max_failures={} max_retries={}",
        config.route.min_interval,
        config.route.jitter,
        config.route.max_failures,
        config.worker.max_retries
    );

    let ledger = Arc::new(SimLedger::new(config.sim.clone()));
    let builder = Arc::new(SimBuilder);
    let dispatcher = match assemble(&config, ledger.clone(), builder, Arc::new(LogSink)) {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            eprintln!("[swarm] {}", e);
            std::process::exit(1);
        }
    };

    eprintln!("[swarm] fetching sequences...");
    if let Err(e) = dispatcher.bootstrap().await {
        eprintln!("[swarm] bootstrap failed: {}", e);
        std::process::exit(1);
    }

    let report = dispatcher.run(config.target).await;

    if config.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("[swarm] report encoding failed: {}", e),
        }
    } else {
        print_report(&report);
    }

    let pool = dispatcher.context().routes.stats();
    eprintln!(
        "[swarm] routes healthy={}/{} backend accepted={} rejected={}",
        pool.healthy,
        pool.total,
        ledger.accepted(),
        ledger.rejected()
    );
    eprintln!("[swarm] done");
}

fn print_report(report: &DispatchReport) {
    println!(
        "succeeded={} failed={} elapsed={}ms throughput={:.2}/s",
        report.succeeded, report.failed, report.elapsed_ms, report.throughput
    );
    for (identity, tally) in &report.identities {
        println!(
            "  {} ok={} failed={} last_seq={}",
            identity,
            tally.succeeded,
            tally.failed,
            tally
                .last_sequence
                .map_or_else(|| "-".to_string(), |s| s.to_string())
        );
    }
    for (class, count) in &report.failures {
        println!("  failures {}={}", class, count);
    }
}

/// env_logger with nanosecond timestamps, `RUST_LOG` overrides the default
fn init_logger() {
    use std::io::Write;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let ts = buf.timestamp_nanos();
            writeln!(
                buf,
                "[{} {:5} {}:{}] {}",
                ts,
                record.level(),
                record.module_path().unwrap_or(""),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .init();
}
