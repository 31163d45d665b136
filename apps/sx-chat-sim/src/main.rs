use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tokio::time;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sx_chat::{
    load_config, paths, save_config, ChatConfig, ChatContext, ChatError, ChatSession, KeyStore,
    SendOutcome, SessionState, TranscriptEntry,
};
use sx_crypto::encoding::{b64d, b64e};
use sx_store::{ChatStore, InMemoryStore, KeyPersistence, SharedClock, SqliteKeyVault, SystemClock};

#[derive(Parser)]
#[command(name = "sx-chat-sim")]
#[command(about = "Run two-party encrypted chat scenarios against an in-memory store", long_about = None)]
struct Cli {
    /// Config file (defaults to chat.json in the data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for the device key vault
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Alice writes before Bob opens; Bob joins shortly after
    Handshake {
        /// How long Bob waits before opening the conversation
        #[arg(long, default_value = "2000")]
        peer_delay_ms: u64,

        /// Messages Alice sends before Bob shows up
        #[arg(default_values_t = vec!["hi bob".to_string(), "are you free tuesday?".to_string()])]
        messages: Vec<String>,
    },

    /// Bob opens only after Alice's key poll has given up; Alice re-polls
    LatePeer {
        /// Extra wait past the key exchange timeout before Bob opens
        #[arg(long, default_value = "1000")]
        grace_ms: u64,
    },

    /// Corrupt one stored message and show the rest still render
    Tamper,

    /// Bob types once; watch Alice's indicator expire
    Typing,

    /// Print the device key fingerprint for a user
    Fingerprint {
        user: String,
    },

    /// Write the effective config to the config path
    WriteConfig,
}

struct Sim {
    store: Arc<InMemoryStore>,
    clock: SharedClock,
    vault: Arc<SqliteKeyVault>,
    config: ChatConfig,
}

impl Sim {
    fn device(&self, user: &str) -> ChatContext {
        let slot = format!("{}-{user}", self.config.key_store.device_slot);
        let persistence: Arc<dyn KeyPersistence> = self.vault.clone();
        let keys = Arc::new(KeyStore::new(persistence, slot));
        let store: Arc<dyn ChatStore> = self.store.clone();
        ChatContext::new(store, keys, Arc::clone(&self.clock), self.config.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => paths::data_dir()?,
    };
    let config_path = cli.config.unwrap_or_else(|| data_dir.join("chat.json"));
    let config = load_config(Some(&config_path))?;

    if let Commands::WriteConfig = cli.command {
        save_config(&config_path, &config)?;
        println!("wrote {}", config_path.display());
        return Ok(());
    }

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating {}", data_dir.display()))?;
    let vault_path = data_dir.join(&config.key_store.database_file);
    let vault = SqliteKeyVault::open(&vault_path)
        .await
        .with_context(|| format!("opening key vault {}", vault_path.display()))?;
    info!(path = %vault_path.display(), "key vault ready");

    let clock: SharedClock = Arc::new(SystemClock);
    let sim = Sim {
        store: Arc::new(InMemoryStore::new(Arc::clone(&clock))),
        clock,
        vault: Arc::new(vault),
        config,
    };

    let outcome = match cli.command {
        Commands::Handshake {
            peer_delay_ms,
            messages,
        } => handshake(&sim, Duration::from_millis(peer_delay_ms), messages).await,
        Commands::LatePeer { grace_ms } => late_peer(&sim, Duration::from_millis(grace_ms)).await,
        Commands::Tamper => tamper(&sim).await,
        Commands::Typing => typing(&sim).await,
        Commands::Fingerprint { user } => fingerprint(&sim, &user).await,
        Commands::WriteConfig => Ok(()),
    };
    sim.vault.close().await;

    if let Err(e) = &outcome {
        if let Some(chat) = e.downcast_ref::<ChatError>() {
            if chat.is_feature_disabling() {
                eprintln!("secure chat is unavailable on this device: {chat}");
            }
        }
    }
    outcome
}

async fn handshake(sim: &Sim, peer_delay: Duration, messages: Vec<String>) -> Result<()> {
    let alice = sim.device("alice");
    let bob = sim.device("bob");
    let conv = alice.open_conversation("alice", "bob", Some("listing-demo")).await?;

    let a = alice.open_session(&conv.id, "alice").await?;
    println!("alice: {:?}", a.state());
    for text in messages {
        report_send("alice", a.send(text).await?);
    }

    time::sleep(peer_delay).await;
    let b = bob.open_session(&conv.id, "bob").await?;
    println!("bob: {:?}", b.state());

    let within = sim.config.timing.key_poll_interval() * 2;
    wait_state(&a, SessionState::KeyReady, within).await?;
    println!("alice: {:?}", a.state());

    report_send("bob", b.send("yes, tuesday works").await?);
    let count = conv_len(sim, &conv.id).await?;
    print_transcript("bob", &wait_transcript(&b, count).await?);
    print_transcript("alice", &wait_transcript(&a, count).await?);

    a.close().await;
    b.close().await;
    Ok(())
}

async fn late_peer(sim: &Sim, grace: Duration) -> Result<()> {
    let alice = sim.device("alice");
    let bob = sim.device("bob");
    let conv = alice.open_conversation("alice", "bob", None).await?;

    let a = alice.open_session(&conv.id, "alice").await?;
    for text in ["one", "two", "three"] {
        report_send("alice", a.send(text).await?);
    }

    let timeout = sim.config.timing.key_exchange_timeout();
    println!("waiting {:?} for the key poll to give up", timeout + grace);
    time::sleep(timeout + grace).await;
    println!("alice: {:?}, {} pending", a.state(), a.pending_len().await);

    let b = bob.open_session(&conv.id, "bob").await?;
    a.repoll()?;
    wait_state(&a, SessionState::KeyReady, sim.config.timing.key_poll_interval() * 2).await?;
    print_transcript("bob", &wait_transcript(&b, 3).await?);

    a.close().await;
    b.close().await;
    Ok(())
}

async fn tamper(sim: &Sim) -> Result<()> {
    let alice = sim.device("alice");
    let bob = sim.device("bob");
    let conv = alice.open_conversation("alice", "bob", None).await?;
    let a = alice.open_session(&conv.id, "alice").await?;
    let b = bob.open_session(&conv.id, "bob").await?;
    wait_state(&a, SessionState::KeyReady, sim.config.timing.key_poll_interval() * 2).await?;

    let mut sent = Vec::new();
    for text in ["first", "second", "third"] {
        if let SendOutcome::Sent(message) = a.send(text).await? {
            sent.push(message);
        }
    }
    let victim = sent
        .get(1)
        .ok_or_else(|| anyhow!("second message was not sent"))?;
    print_transcript("bob (before)", &wait_transcript(&b, 3).await?);

    sim.store.tamper_message(&conv.id, &victim.id, |m| {
        if let Ok(mut raw) = b64d(&m.ciphertext) {
            if let Some(byte) = raw.first_mut() {
                *byte ^= 0x01;
            }
            m.ciphertext = b64e(&raw);
        }
    })?;
    println!("flipped one bit in message {}", victim.id);
    print_transcript("bob (after)", &wait_transcript(&b, 2).await?);

    a.close().await;
    b.close().await;
    Ok(())
}

async fn typing(sim: &Sim) -> Result<()> {
    let alice = sim.device("alice");
    let bob = sim.device("bob");
    let conv = alice.open_conversation("alice", "bob", None).await?;
    let a = alice.open_session(&conv.id, "alice").await?;
    let b = bob.open_session(&conv.id, "bob").await?;

    b.notify_typing().await?;
    let mut presence = a.watch_presence();
    time::timeout(
        Duration::from_secs(2),
        presence.wait_for(|p| p.last_typing_at.is_some()),
    )
    .await
    .map_err(|_| anyhow!("typing ping never arrived"))??;

    let window = sim.config.timing.typing_window();
    let step = Duration::from_secs(1);
    let mut waited = Duration::ZERO;
    while waited <= window + step {
        println!("t+{}s bob typing: {}", waited.as_secs(), a.is_peer_typing());
        time::sleep(step).await;
        waited += step;
    }

    a.close().await;
    b.close().await;
    Ok(())
}

async fn fingerprint(sim: &Sim, user: &str) -> Result<()> {
    let ctx = sim.device(user);
    let pair = ctx.keys().get_or_create_key_pair().await?;
    println!("{user} ({}): {}", ctx.keys().slot(), pair.public().fingerprint());
    Ok(())
}

async fn conv_len(sim: &Sim, conversation_id: &str) -> Result<usize> {
    Ok(sim.store.list_messages(conversation_id).await?.len())
}

async fn wait_state(session: &ChatSession, want: SessionState, within: Duration) -> Result<()> {
    let mut rx = session.watch_state();
    time::timeout(within, rx.wait_for(|s| *s == want))
        .await
        .map_err(|_| anyhow!("{} did not reach {want:?} within {within:?}", session.user_id()))??;
    Ok(())
}

async fn wait_transcript(session: &ChatSession, len: usize) -> Result<Vec<TranscriptEntry>> {
    let mut rx = session.watch_transcript();
    let entries = time::timeout(Duration::from_secs(5), rx.wait_for(|t| t.len() == len))
        .await
        .map_err(|_| anyhow!("{} transcript stuck below {len} entries", session.user_id()))??
        .clone();
    Ok(entries)
}

fn report_send(who: &str, outcome: SendOutcome) {
    match outcome {
        SendOutcome::Sent(m) => println!("{who}: sent {}", m.id),
        SendOutcome::Queued { position } => println!("{who}: queued at position {position}"),
    }
}

fn print_transcript(viewer: &str, entries: &[TranscriptEntry]) {
    println!("── transcript as seen by {viewer} ──");
    for e in entries {
        let arrow = if e.outgoing { "→" } else { "←" };
        println!(
            "{} {arrow} {:<6} {}",
            e.created_at.format("%H:%M:%S%.3f"),
            e.sender_id,
            e.text
        );
    }
}
