use clap::Parser;
use speech_stream::{
    audio_source::ChunkedReader,
    config::{load_config, ApiConfig, SessionConfig},
    RecognitionMode, RecognitionRequest, RecognitionSession,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "speech-stream", about = "Stream an audio file to the speech recognition service")]
struct Args {
    /// Raw audio file to send
    audio_file: PathBuf,

    /// Locale tag, e.g. en-US
    locale: String,

    /// Recognition mode: short (short phrase) or long (long dictation)
    mode: RecognitionMode,

    /// Subscription key (defaults to SPEECH_SUBSCRIPTION_KEY)
    #[arg(long)]
    key: Option<String>,

    /// Audio bytes per frame
    #[arg(long, default_value_t = 1024)]
    chunk_size: usize,

    /// Wait up to this many seconds for the server to acknowledge the context frame
    #[arg(long)]
    wait_for_ack: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();
    let args = Args::parse();

    if !args.audio_file.is_file() {
        eprintln!("❌ Audio file not found: {}", args.audio_file.display());
        std::process::exit(1);
    }

    let api_config = match args.key {
        Some(key) => ApiConfig::from_key(key)?,
        None => load_config()?,
    };

    let config = SessionConfig {
        chunk_size: args.chunk_size,
        ack_timeout: args.wait_for_ack.map(Duration::from_secs),
        ..Default::default()
    };
    config.validate()?;

    let audio = ChunkedReader::open(&args.audio_file, config.chunk_size).await?;
    let (mut session, mut results) = RecognitionSession::websocket(config)?;

    // Print hypotheses as they arrive, independent of the send loop
    let printer = tokio::spawn(async move {
        while let Some(partial) = results.partials.recv().await {
            println!("… {}", partial.display_text);
        }
    });

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Received Ctrl+C, cancelling session...");
            ctrl_c_cancel.cancel();
        }
    });

    let request = RecognitionRequest::new(args.locale, args.mode);
    println!(
        "🎧 Streaming {} ({}, {})",
        args.audio_file.display(),
        request.locale,
        request.mode
    );

    let summary = session
        .run(audio, &request, api_config.subscription_key(), &cancel)
        .await?;
    drop(session);
    let _ = printer.await;

    match summary.final_result {
        Some(result) => {
            println!("✨ Recognition status: {}", result.recognition_status);
            for phrase in &result.phrases {
                println!("   \"{}\" (confidence: {:.3})", phrase.display_text, phrase.confidence);
            }
        }
        None => println!("⚠️  No final result received"),
    }
    log::info!("Session finished in {:?}", summary.elapsed);

    Ok(())
}
