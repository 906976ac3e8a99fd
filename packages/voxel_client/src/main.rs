
#[macro_use]
extern crate tracing;

use voxel_client::{
    logging::init_logging,
    settings::SETTINGS_FILE_NAME,
    transport::Transport,
    renderer::CountingRenderer,
    Settings,
    Client,
};
use chunk_data::parse_chunk_name;
use std::{
    env::args,
    thread::sleep,
    time::{
        Duration,
        Instant,
    },
};
use tokio::runtime::Runtime;
use vek::*;


const CLI_INTRO: &'static str = r#"Headless voxel world client.

Streams chunks around a fixed center from a server and meshes them, without displaying them."#;

const CLI_HELP: &'static str = r#"
Examples:

    [this command]
    Connect using the url in settings.json, or ws://127.0.0.1:4000/

    [this command] --url=ws://127.0.0.1:4000/ --center=0|0
    Connect to an explicit url, centered on an explicit chunk

    [this command] --settings=my_settings.json
    Read settings from a different file

Env var examples:
    RUST_LOG=voxel_client=trace
    Changes logging levels"#;

// target duration of one tick
const TICK_INTERVAL: Duration = Duration::from_millis(16);

// how often to log progress
const STATS_INTERVAL: Duration = Duration::from_secs(5);


fn main() {
    println!("{}", CLI_INTRO);
    init_logging();

    let args = args().collect::<Vec<_>>();
    if args.get(1).map(String::as_str) == Some("--help") {
        println!("{}", CLI_HELP);
        return;
    }

    let settings_path = arg_value(&args, "--settings=").unwrap_or(SETTINGS_FILE_NAME);
    let mut settings = Settings::read(settings_path);
    if let Some(url) = arg_value(&args, "--url=") {
        settings.network.url = url.to_owned();
    }
    let center = match arg_value(&args, "--center=") {
        Some(name) => match parse_chunk_name(name) {
            Some(cc) => cc,
            None => {
                error!(?name, "invalid center chunk, expected form x|z");
                return;
            }
        },
        None => Vec2::new(0, 0),
    };

    info!("starting client");
    let rt = Runtime::new().expect("error creating tokio runtime");
    let transport = Transport::connect(&settings.network.url, rt.handle());
    let mut client = match Client::new(&settings, transport, CountingRenderer::new()) {
        Ok(client) => client,
        Err(e) => {
            error!(?e, "error starting client");
            return;
        }
    };

    let mut last_stats = Instant::now();
    while !client.is_finished() {
        let tick_start = Instant::now();
        client.tick(center);
        if last_stats.elapsed() >= STATS_INTERVAL {
            log_stats(&client);
            last_stats = Instant::now();
        }
        if let Some(remaining) = TICK_INTERVAL.checked_sub(tick_start.elapsed()) {
            sleep(remaining);
        }
    }
    log_stats(&client);
    match client.network.close_reason() {
        Some(reason) => info!(%reason, "client stopped"),
        None => info!("client stopped"),
    }
}

// value of a `--name=value` argument
fn arg_value<'a>(args: &'a [String], prefix: &str) -> Option<&'a str> {
    args.iter()
        .filter_map(|arg| arg.strip_prefix(prefix))
        .next()
}

fn log_stats(client: &Client<CountingRenderer>) {
    use voxel_client::chunk_pipeline::StageKind;

    let chunks = client.world.chunks();
    let renderer = client.world.renderer();
    info!(
        ticks = client.world.ticks(),
        requested = chunks.count(StageKind::Requested),
        processing = chunks.count(StageKind::Processing),
        loaded = chunks.count(StageKind::Loaded),
        displayed = renderer.chunks.len(),
        levels = renderer.levels.len(),
        vertices = renderer.vertex_count(),
        mesh_jobs = client.world.mesh_jobs_in_flight(),
        "client stats",
    );
}
