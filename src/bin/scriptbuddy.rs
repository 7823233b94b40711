use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use scriptbuddy_realtime::remote::{self, ServiceConfig};
use scriptbuddy_realtime::settings::Settings;
use scriptbuddy_realtime::types::{RoleKey, ScriptDocument};
use scriptbuddy_realtime::utils::device;
use scriptbuddy_realtime::utils::native::CpalBackend;
use scriptbuddy_realtime::{
    Config, MasteryLevel, Performer, PerformerApi, Phase, RehearsalFlow, RehearsalState,
    RehearsalStore, ReviewerClient,
};
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Rehearse a dialogue script out loud")]
struct Cli {
    /// Role to rehearse (甲/乙, or A/B). Asked for when omitted.
    #[arg(long)]
    role: Option<String>,
    /// How much of your own lines to hide, 1 (nothing) to 3 (everything)
    #[arg(long, default_value_t = 1)]
    level: u8,
    /// Script document to load instead of fetching one
    #[arg(long)]
    script: Option<PathBuf>,
    /// Print the available audio devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::from_env().context("Failed to load application configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(settings.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let args = Cli::parse();
    if args.list_devices {
        println!("Input devices:\n{}", device::get_available_inputs()?);
        println!("Output devices:\n{}", device::get_available_outputs()?);
        return Ok(());
    }
    let level = MasteryLevel::new(args.level).context("level must be between 1 and 3")?;

    let store = RehearsalStore::new();

    let service = match remote::fetch_service_config(&settings.api_base).await {
        Ok(service) => service,
        Err(e) => {
            tracing::warn!("no service config ({:#}), intent checking disabled", e);
            ServiceConfig::default()
        }
    };

    let script = match args.script.as_ref().or(settings.script_file.as_ref()) {
        Some(path) => remote::load_script_file(path)?,
        None => remote::fetch_script(&settings.api_base, settings.script_id.as_deref()).await?,
    };
    if script.is_empty() {
        anyhow::bail!("script {:?} has no lines", script.title());
    }
    let role = match args.role.as_deref() {
        Some(role) => role.parse::<RoleKey>()?,
        None => ask_role(script.clone()).await?,
    };
    if !script.selectable_roles().contains(&role) {
        anyhow::bail!("role {} has no lines in {:?}", role, script.title());
    }
    store.load_script(script);

    let mut backend = CpalBackend::new();
    if let Some(name) = &settings.input_device {
        backend = backend.with_input_device(name.as_str());
    }
    if let Some(name) = &settings.output_device {
        backend = backend.with_output_device(name.as_str());
    }
    let performer = Arc::new(
        Performer::new(Config::new(), Arc::new(backend))
            .with_listener(Arc::new(|state| tracing::info!("performer: {:?}", state))),
    );
    performer
        .check_system()
        .ensure_ready()
        .context("Audio devices are not ready. Fix them and start again")?;

    store.set_phase(Phase::SelectingRole)?;
    store.select_role(role);
    store.set_level(level);

    let mut flow = RehearsalFlow::new(store.clone(), performer.clone())
        .with_completion_phrase(&settings.completion_phrase);
    if let Some(classification) = service.classification {
        let mut reviewer = ReviewerClient::new(classification.api_key);
        if let Some(base_url) = &classification.base_url {
            reviewer = reviewer.with_base_url(base_url);
        }
        if let Some(model) = &classification.model {
            reviewer = reviewer.with_model(model);
        }
        tracing::info!("intent checking with {}", reviewer.model());
        flow = flow.with_reviewer(Arc::new(reviewer));
    }

    let presenter = tokio::spawn(present(store.clone()));
    let flow = tokio::spawn(flow.run());
    store.set_phase(Phase::Rehearsing)?;

    let mut state_rx = store.subscribe();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
        _ = state_rx.wait_for(|state| state.phase != Phase::Rehearsing) => {}
    }
    store.set_phase(Phase::Terminated)?;
    flow.await.context("rehearsal flow panicked")?;
    presenter.abort();
    Ok(())
}

async fn ask_role(script: ScriptDocument) -> Result<RoleKey> {
    tokio::task::spawn_blocking(move || {
        let roles = script.selectable_roles();
        println!("{}", script.title());
        for role in &roles {
            println!("  {} {}", role, script.display_name(*role));
        }
        loop {
            println!("Which role do you want to rehearse?");
            let mut line = String::new();
            if std::io::stdin().read_line(&mut line)? == 0 {
                anyhow::bail!("no role selected");
            }
            match line.parse::<RoleKey>() {
                Ok(role) if roles.contains(&role) => return Ok(role),
                _ => println!("Pick one of the roles above."),
            }
        }
    })
    .await?
}

/// Prints each line as the cursor reaches it.
async fn present(store: RehearsalStore) {
    let mut state_rx = store.subscribe();
    let mut shown = None;
    loop {
        let state = state_rx.borrow_and_update().clone();
        let key = (state.phase, state.cursor, state.level, state.revision);
        if state.phase == Phase::Rehearsing && shown != Some(key) {
            shown = Some(key);
            print_line(&state);
        }
        if state_rx.changed().await.is_err() {
            break;
        }
    }
}

fn print_line(state: &RehearsalState) {
    let (Some(script), Some(line)) = (state.script.as_ref(), state.current_line()) else {
        return;
    };
    let text = if Some(line.role()) == state.role {
        mask(line.content(), state.level)
    } else {
        line.content().to_string()
    };
    println!(
        "[{}/{}] {}: {}",
        state.cursor + 1,
        script.len(),
        script.display_name(line.role()),
        text
    );
}

fn mask(text: &str, level: MasteryLevel) -> String {
    match level.get() {
        1 => text.to_string(),
        2 => text
            .chars()
            .enumerate()
            .map(|(i, c)| if i == 0 || c.is_ascii_punctuation() { c } else { '_' })
            .collect(),
        _ => "_".repeat(text.chars().count()),
    }
}
