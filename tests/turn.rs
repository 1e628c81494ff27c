//! End-to-end turn tests
//!
//! Full turns against scripted services, with tokio time paused so the
//! silence endpointing and playback gaps run instantly.

use avatar_voice::Error;
use avatar_voice::assistant::{
    Emotion, Knowledge, PromptBuilder, SessionState, Status, SynthesisPolicy,
};
use tokio::sync::watch;

mod common;

use common::{FixedTranscriber, Harness, RandomLatencySynth, ScriptedGenerator, ScriptedMic};

const POLICIES: [SynthesisPolicy; 2] = [
    SynthesisPolicy::Serial,
    SynthesisPolicy::Concurrent { max_in_flight: 4 },
];

/// Record every distinct value of a projection of the session until the
/// session is dropped or `stop` returns true
fn record<T, F, S>(
    mut rx: watch::Receiver<SessionState>,
    project: F,
    stop: S,
) -> tokio::task::JoinHandle<Vec<T>>
where
    T: PartialEq + Send + 'static,
    F: Fn(&SessionState) -> T + Send + 'static,
    S: Fn(&SessionState) -> bool + Send + 'static,
{
    tokio::spawn(async move {
        let initial = rx.borrow_and_update().clone();
        let mut seen = vec![project(&initial)];
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            let value = project(&state);
            if seen.last() != Some(&value) {
                seen.push(value);
            }
            if stop(&state) {
                break;
            }
        }
        seen
    })
}

fn turn_over(state: &SessionState) -> bool {
    matches!(state.status, Status::Ready | Status::Error | Status::MicError)
}

#[tokio::test(start_paused = true)]
async fn test_full_turn_speaks_reply_in_order() {
    let h = Harness::new(
        FixedTranscriber::new("Tell me something great and amazing"),
        ScriptedGenerator::new(&[
            "That is ",
            "great! ",
            "I am glad",
            " you asked. ",
            "Have a nice day",
        ]),
        RandomLatencySynth::new(),
        SynthesisPolicy::Serial,
    );

    h.assistant.start(&mut ScriptedMic::utterance()).await.unwrap();

    let state = h.assistant.session().snapshot();
    assert_eq!(state.status, Status::Ready);
    assert_eq!(state.input_text, "Tell me something great and amazing");
    assert_eq!(
        state.reply_text,
        "That is great! I am glad you asked. Have a nice day"
    );
    assert_eq!(state.emotion, Emotion::Happy);
    assert!(!state.is_listening);
    assert!(!state.is_speaking);

    assert_eq!(
        h.sink.played(),
        vec!["That is great!", "I am glad you asked.", "Have a nice day"]
    );
    assert!(h.sink.speaking_during_play.lock().unwrap().iter().all(|s| *s));

    let view = h.assistant.render_view();
    assert_eq!(view.expression, Emotion::Happy);
    assert!(!view.is_speaking);
    assert!(view.audio_energy.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_status_walks_through_turn_stages() {
    let h = Harness::new(
        FixedTranscriber::new("What time is fika?"),
        ScriptedGenerator::new(&["Fika is at three today. ", "See you there!"]),
        RandomLatencySynth::new(),
        SynthesisPolicy::Serial,
    );
    let statuses = record(h.assistant.subscribe(), |s| s.status, turn_over);

    h.assistant.start(&mut ScriptedMic::utterance()).await.unwrap();
    let statuses = statuses.await.unwrap();

    let order = [
        Status::Idle,
        Status::Listening,
        Status::Transcribing,
        Status::GeneratingReply,
        Status::Responding,
        Status::Ready,
    ];
    // Observed statuses follow the stage order; quick stages may be coalesced
    let mut cursor = order.iter();
    for status in &statuses {
        assert!(cursor.any(|s| s == status), "out of order: {statuses:?}");
    }
    for required in [Status::Listening, Status::Transcribing, Status::Responding, Status::Ready] {
        assert!(statuses.contains(&required), "missing {required:?}: {statuses:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_playback_order_matches_enqueue_order() {
    let sentences: Vec<String> = (1..=10)
        .map(|i| format!("Sentence number {i} is here."))
        .collect();
    let text = sentences.join(" ");

    // Fragments cut at awkward places, independent of sentence boundaries
    let chars: Vec<char> = text.chars().collect();
    let fragments: Vec<String> = chars.chunks(7).map(|c| c.iter().collect()).collect();
    let fragments: Vec<&str> = fragments.iter().map(String::as_str).collect();

    for policy in POLICIES {
        for _ in 0..3 {
            let h = Harness::new(
                FixedTranscriber::new("Count for me"),
                ScriptedGenerator::new(&fragments),
                RandomLatencySynth::new(),
                policy,
            );

            h.assistant.start(&mut ScriptedMic::utterance()).await.unwrap();

            assert_eq!(h.sink.played(), sentences, "policy {policy:?}");
            assert_eq!(h.assistant.session().status(), Status::Ready);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_unit_is_skipped_and_speaking_holds() {
    for policy in POLICIES {
        let h = Harness::new(
            FixedTranscriber::new("Give me three things"),
            ScriptedGenerator::new(&[
                "First unit here. ",
                "Second unit here. ",
                "Third unit here.",
            ]),
            RandomLatencySynth::new().failing_on("Second unit here."),
            policy,
        );
        let speaking = record(h.assistant.subscribe(), |s| s.is_speaking, turn_over);

        h.assistant.start(&mut ScriptedMic::utterance()).await.unwrap();

        assert_eq!(h.sink.played(), vec!["First unit here.", "Third unit here."]);
        assert_eq!(
            *h.sink.speaking_during_play.lock().unwrap(),
            vec![true, true]
        );
        // Raised once, lowered once at the very end
        assert_eq!(speaking.await.unwrap(), vec![false, true, false]);
        assert_eq!(h.assistant.session().status(), Status::Ready);
    }
}

#[tokio::test(start_paused = true)]
async fn test_empty_transcript_ends_in_error() {
    let h = Harness::new(
        FixedTranscriber::new("   "),
        ScriptedGenerator::new(&["unused"]),
        RandomLatencySynth::new(),
        SynthesisPolicy::Serial,
    );

    let result = h.assistant.start(&mut ScriptedMic::utterance()).await;

    assert!(matches!(result, Err(Error::Transcription(_))));
    let state = h.assistant.session().snapshot();
    assert_eq!(state.status, Status::Error);
    assert!(!state.is_listening);
    assert_eq!(h.generator.opened(), 0);
    assert!(h.sink.played().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_denied_mic_ends_in_mic_error() {
    let h = Harness::new(
        FixedTranscriber::new("never heard"),
        ScriptedGenerator::new(&["unused"]),
        RandomLatencySynth::new(),
        SynthesisPolicy::Serial,
    );

    let result = h.assistant.start(&mut ScriptedMic::denied()).await;

    assert!(matches!(result, Err(Error::Permission(_))));
    let state = h.assistant.session().snapshot();
    assert_eq!(state.status, Status::MicError);
    assert!(!state.is_listening);
    assert_eq!(
        h.transcriber.calls.load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}

#[tokio::test(start_paused = true)]
async fn test_broken_stream_drains_queued_audio_then_errors() {
    let h = Harness::new(
        FixedTranscriber::new("Tell me a story"),
        ScriptedGenerator::new(&["Once upon a time. ", "There was a cat. ", "The end"])
            .failing_after(2),
        RandomLatencySynth::new(),
        SynthesisPolicy::Serial,
    );

    let result = h.assistant.start(&mut ScriptedMic::utterance()).await;

    assert!(matches!(result, Err(Error::Generation(_))));
    assert_eq!(h.sink.played(), vec!["Once upon a time.", "There was a cat."]);

    let state = h.assistant.session().snapshot();
    assert_eq!(state.status, Status::Error);
    assert_eq!(state.reply_text, "Once upon a time. There was a cat. ");
    assert!(!state.is_speaking);
}

#[tokio::test(start_paused = true)]
async fn test_start_while_busy_is_rejected() {
    let h = Harness::new(
        FixedTranscriber::new("Hello there"),
        ScriptedGenerator::new(&["Hi! Nice to meet you."]),
        RandomLatencySynth::new(),
        SynthesisPolicy::Serial,
    );
    let mut first_mic = ScriptedMic::utterance();
    let mut second_mic = ScriptedMic::utterance();

    let (first, second) = tokio::join!(h.assistant.start(&mut first_mic), async {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        h.assistant.start(&mut second_mic).await
    });

    first.unwrap();
    assert!(matches!(second, Err(Error::Busy(Status::Listening))));
    assert!(!second_mic.stopped);
    assert_eq!(h.generator.opened(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_next_turn_starts_fresh() {
    let h = Harness::new(
        FixedTranscriber::new("Say it again"),
        ScriptedGenerator::new(&["Sure, here it is. ", "Again."]),
        RandomLatencySynth::new(),
        SynthesisPolicy::Serial,
    );

    h.assistant.start(&mut ScriptedMic::utterance()).await.unwrap();
    h.assistant.start(&mut ScriptedMic::utterance()).await.unwrap();

    let state = h.assistant.session().snapshot();
    assert_eq!(state.reply_text, "Sure, here it is. Again.");
    assert_eq!(state.status, Status::Ready);
    assert_eq!(h.sink.played().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_error_state_accepts_new_turn() {
    let h = Harness::new(
        FixedTranscriber::new("Hello"),
        ScriptedGenerator::new(&["Hello to you too!"]),
        RandomLatencySynth::new(),
        SynthesisPolicy::Serial,
    );

    let denied = h.assistant.start(&mut ScriptedMic::denied()).await;
    assert!(matches!(denied, Err(Error::Permission(_))));

    h.assistant.start(&mut ScriptedMic::utterance()).await.unwrap();
    assert_eq!(h.assistant.session().status(), Status::Ready);
    assert_eq!(h.sink.played(), vec!["Hello to you too!"]);
}

#[tokio::test(start_paused = true)]
async fn test_trigger_keyword_injects_reference_material() {
    let prompt = PromptBuilder::new("You are Embeddy.").with_knowledge(Knowledge::new(
        vec!["thesis".to_string()],
        "Thesis topics: LLM-powered RAG on AWS.",
    ));
    let h = Harness::with_prompt(
        FixedTranscriber::new("Do you have any thesis topics?"),
        ScriptedGenerator::new(&["We do! Let me list them."]),
        RandomLatencySynth::new(),
        SynthesisPolicy::Serial,
        prompt,
    );

    h.assistant.start(&mut ScriptedMic::utterance()).await.unwrap();

    let requests = h.generator.requests.lock().unwrap();
    let messages = &requests[0];
    assert_eq!(messages[0].role, "system");
    assert!(messages[1].content.starts_with("Do you have any thesis topics?"));
    assert!(messages[1].content.contains("LLM-powered RAG on AWS"));
}
