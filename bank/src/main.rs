use {
    groupcast_bank::{
        cli::{self, NodeArgs},
        config,
        error::Result,
        input, logger,
        processor::Processor,
    },
    groupcast_multicast::TotalOrderMulticast,
    log::{error, info},
    std::process::exit,
    tokio::io::BufReader,
};

#[tokio::main]
async fn main() {
    let matches = cli::app().get_matches();
    let args = match NodeArgs::from_matches(&matches) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            exit(1);
        }
    };
    logger::setup_with_default(&args.log_filter);

    if let Err(e) = run(args).await {
        error!("{}", e);
        exit(1);
    }
}

async fn run(args: NodeArgs) -> Result<()> {
    let members = config::load_node_table(&args.config_path).await?;
    let mut group_config = config::group_config(&args.node_id, args.port, members);
    if let Some(retry_interval_ms) = args.retry_interval_ms {
        group_config.dial_retry_interval_ms = retry_interval_ms;
    }

    let group = TotalOrderMulticast::new(group_config);
    let processor = Processor::new();
    processor.register(group.dispatcher());

    group.start().await?;
    group.wait_for_mesh().await?;
    info!(
        "node [{}] joined a group of {}",
        args.node_id,
        group.basic().live_count()
    );

    let input_task = tokio::spawn(input::run_input(
        BufReader::new(tokio::io::stdin()),
        group.clone(),
    ));

    // Stdin reaching EOF does not stop the node: it keeps applying
    // transactions from the rest of the group until interrupted.
    tokio::signal::ctrl_c().await?;
    info!("interrupted, shutting down");
    input_task.abort();
    group.shutdown();
    info!("{}", processor.snapshot_line());
    Ok(())
}
