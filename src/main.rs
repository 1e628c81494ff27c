use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use avatar_voice::assistant::{Assistant, SessionState, classify};
use avatar_voice::voice::{
    AudioCapture, AudioPlayback, AudioSink, MicSource, PLAYBACK_SAMPLE_RATE, Synthesizer,
    TextToSpeech, rms,
};
use avatar_voice::{Config, Error};

/// Avatar - talk to the office assistant
#[derive(Parser)]
#[command(name = "avatar", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print session snapshots as JSON lines
    #[arg(long, env = "AVATAR_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Converse turn by turn; press Enter to speak (default)
    Talk,
    /// Run a single turn and exit
    Once,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hej! This is a test of the text to speech system.")]
        text: String,
    },
    /// Print the expression a reply would produce
    Classify {
        /// Reply text
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,avatar_voice=info",
        1 => "info,avatar_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Command::Talk) {
        Command::Talk => talk(cli.json).await,
        Command::Once => once(cli.json).await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::TestTts { text } => test_tts(&text).await,
        Command::Classify { text } => {
            println!("{}", classify(&text));
            Ok(())
        }
    }
}

/// Interactive loop: each Enter starts a turn
#[allow(clippy::future_not_send)]
async fn talk(json: bool) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    let assistant = Assistant::from_config(&config)?;
    let watcher = tokio::spawn(watch_session(assistant.subscribe(), json));
    let mut mic = AudioCapture::new();

    println!("Press Enter to talk, Ctrl-D to quit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while lines.next_line().await?.is_some() {
        match assistant.start(&mut mic).await {
            Ok(()) => {}
            Err(Error::Busy(status)) => println!("Still busy ({status})"),
            // Already reflected in the session status
            Err(e) => tracing::debug!(error = %e, "turn ended with error"),
        }
        println!("Press Enter to talk again.");
    }

    watcher.abort();
    Ok(())
}

/// A single turn, exiting non-zero if it fails
#[allow(clippy::future_not_send)]
async fn once(json: bool) -> anyhow::Result<()> {
    let config = Config::load()?;
    let assistant = Assistant::from_config(&config)?;
    let watcher = tokio::spawn(watch_session(assistant.subscribe(), json));

    println!("Listening...");
    let mut mic = AudioCapture::new();
    let result = assistant.start(&mut mic).await;

    // Let the watcher print the final snapshot
    tokio::time::sleep(Duration::from_millis(50)).await;
    watcher.abort();

    result?;
    Ok(())
}

/// Print session changes until the session is dropped
async fn watch_session(mut rx: watch::Receiver<SessionState>, json: bool) {
    let mut last = rx.borrow_and_update().clone();

    while rx.changed().await.is_ok() {
        let state = rx.borrow_and_update().clone();

        if json {
            match serde_json::to_string(&state) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "failed to serialize snapshot"),
            }
        } else {
            let controls = state.controls();
            if state.status != last.status {
                println!("[{}]", controls.status);
            }
            if state.input_text != last.input_text && !state.input_text.is_empty() {
                println!("You: {}", controls.input_text);
            }
            if let Some(delta) = state.reply_text.strip_prefix(last.reply_text.as_str()) {
                if !delta.is_empty() {
                    print!("{delta}");
                    let _ = std::io::stdout().flush();
                }
            }
            let turn_ended = state.status != last.status && state.status.accepts_start();
            if turn_ended && !state.reply_text.is_empty() {
                println!();
            }
            if state.emotion != last.emotion {
                println!("(Embeddy looks {})", state.emotion);
            }
        }

        last = state;
    }
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let threshold = Config::load().map_or(0.01, |c| c.voice.silence_threshold);
    let mut capture = AudioCapture::new();
    capture.start()?;

    let sample_rate = capture.sample_rate();
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_buffer();
        let energy = rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);
        let silent = if energy < threshold { " (silence)" } else { "" };

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]{}",
            i + 1,
            energy,
            peak,
            meter,
            silent
        );
    }

    capture.stop();

    println!("\n---");
    println!("Speech should sit well above the silence threshold.");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new()?;

    let frequency = 440.0_f32;
    let num_samples = PLAYBACK_SAMPLE_RATE as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {PLAYBACK_SAMPLE_RATE} Hz...", samples.len());
    playback.play_samples(samples).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Test TTS output against the configured endpoint
async fn test_tts(text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let config = Config::load()?;
    let tts = TextToSpeech::new(
        config.http_client()?,
        &config.api.base_url,
        config.api.api_key.clone(),
        &config.voice.tts_model,
        &config.voice.tts_voice,
    );

    println!("Synthesizing speech...");
    let mp3_data = tts.synthesize(text).await?;
    println!("Got {} bytes of audio data", mp3_data.len());

    // Check MP3 header
    if mp3_data.len() > 3 {
        println!(
            "First 4 bytes: {:02x} {:02x} {:02x} {:02x}",
            mp3_data[0], mp3_data[1], mp3_data[2], mp3_data[3]
        );
    }

    println!("Playing audio...");
    let playback = AudioPlayback::new()?;
    playback.play(&mp3_data).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}
