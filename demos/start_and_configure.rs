use anyhow::Context;
use appserver_runner::commands::{Command, ExecutionUnit};
use appserver_runner::transport::{Address, Operation};
use appserver_runner::ServerRunner;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "demos/runner.yaml".to_string());

    // Logs go to a file so they do not interleave with server output.
    let file_appender = tracing_appender::rolling::never(".", "start_and_configure.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();

    let mut runner = ServerRunner::from_config_file(&config_path)
        .with_context(|| format!("loading {}", config_path))?;

    let cancel = runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    println!("Starting server...");
    let handle = runner.start_server().await.context("starting server")?;
    let topology = handle.topology_description().await?;
    println!(
        "Server {} is running (domain: {}, hosts: {:?})",
        handle.id(),
        topology.is_domain,
        topology.hosts
    );

    // Two changes that land together or not at all.
    let unit = ExecutionUnit::new(
        vec![
            Command::from("/system-property=demo.greeting:add(value=\"hello\")"),
            Command::Operation(
                Operation::add(Address::of("system-property", "demo.count")).param("value", "2"),
            ),
        ],
        true,
    );
    runner.execute(&unit).await.context("applying batch")?;

    let client = runner.client().await?;
    let greeting = client
        .read_attribute_string(Address::of("system-property", "demo.greeting"), "value")
        .await?;
    println!("demo.greeting = {}", greeting);

    if let Some(report) = runner.execute_commands().await? {
        println!("Applied {} configured commands", report.results.len());
    }
    let removed = runner.undeploy().await?;
    if !removed.is_empty() {
        println!("Undeployed: {}", removed.join(", "));
    }

    println!("Stopping server...");
    runner.shutdown_server(true).await?;
    println!("Done");
    Ok(())
}
