use bytes::Bytes;
use chatdelta::frames::frame_stream;
use chatdelta::session::Session;
use chatdelta::*;
use futures_util::{stream, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn sse(payloads: &[Value]) -> String {
    let mut body = String::new();
    for p in payloads {
        body.push_str(&format!("data: {}\n\n", p));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn content(text: &str) -> Value {
    json!({"choices": [{"delta": {"content": text}}]})
}

fn split_at(body: &[u8], cuts: &[usize]) -> Vec<Vec<u8>> {
    let mut chunks = Vec::new();
    let mut last = 0;
    for &cut in cuts {
        chunks.push(body[last..cut].to_vec());
        last = cut;
    }
    chunks.push(body[last..].to_vec());
    chunks
}

async fn decode_chunks(
    session: &mut Session,
    chunks: Vec<Vec<u8>>,
) -> (Result<StreamSummary>, Vec<EmittedEvent>) {
    let body = stream::iter(
        chunks
            .into_iter()
            .map(|c| Ok::<Bytes, std::io::Error>(Bytes::from(c))),
    );
    let frames = frame_stream(body);
    tokio::pin!(frames);

    let (tx, mut rx) = mpsc::channel(1024);
    let cancel = CancellationToken::new();
    let result = session.run(frames, &cancel, &tx).await;
    drop(tx);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (result, events)
}

async fn decode(body: &str) -> (StreamSummary, Vec<EmittedEvent>) {
    let mut session = Session::new(SessionOptions::default());
    let (result, events) = decode_chunks(&mut session, vec![body.as_bytes().to_vec()]).await;
    match result {
        Ok(summary) => (summary, events),
        Err(e) => panic!("Unexpected error: {}", e),
    }
}

/// Merges adjacent text and blanks generated ids so chunkings can be compared.
fn normalize(events: Vec<EmittedEvent>) -> Vec<EmittedEvent> {
    let mut out: Vec<EmittedEvent> = Vec::new();
    for event in events {
        match event {
            EmittedEvent::Text { content } => {
                if let Some(EmittedEvent::Text { content: last }) = out.last_mut() {
                    last.push_str(&content);
                } else {
                    out.push(EmittedEvent::Text { content });
                }
            }
            EmittedEvent::ToolCall {
                name, arguments, ..
            } => out.push(EmittedEvent::ToolCall {
                id: String::new(),
                name,
                arguments,
            }),
            other => out.push(other),
        }
    }
    out
}

fn tool_call(name: &str, arguments: Value) -> EmittedEvent {
    let arguments = match arguments {
        Value::Object(map) => map,
        other => panic!("Expected object arguments, got {}", other),
    };
    EmittedEvent::ToolCall {
        id: String::new(),
        name: name.to_string(),
        arguments,
    }
}

#[tokio::test]
async fn test_plain_text_stream() {
    let (summary, events) = decode(&sse(&[content("hi")])).await;
    assert_eq!(events, vec![EmittedEvent::text("hi")]);
    assert_eq!(summary.status, StreamStatus::Completed);
    assert_eq!(summary.output_tokens, 1);
    assert_eq!(summary.events_emitted, 1);
}

#[tokio::test]
async fn test_structured_tool_call_assembled_across_frames() {
    let body = sse(&[
        json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "id": "call_s1", "function": {"name": "search", "arguments": "{\"q\":"}}
        ]}}]}),
        json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "function": {"arguments": "\"x\"}"}}
        ]}}]}),
        json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}),
    ]);
    let (summary, events) = decode(&body).await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        EmittedEvent::ToolCall {
            id,
            name,
            arguments,
        } => {
            assert_eq!(id, "call_s1");
            assert_eq!(name, "search");
            assert_eq!(json!(arguments), json!({"q": "x"}));
        }
        other => panic!("Expected tool call, got {:?}", other),
    }
    assert_eq!(summary.finish_reason, Some(FinishReason::ToolCallsRequested));
    // "{\"q\":" is 5 bytes, "\"x\"}" is 4
    assert_eq!(summary.output_tokens, 3);
}

#[tokio::test]
async fn test_inline_tool_call_emitted_speculatively() {
    let body = sse(&[
        content("<|tool_call_begin|>foo<|tool_call_argument_begin|>{\"x\":"),
        content("1}<|tool_call_end|> done"),
    ]);
    let (_, events) = decode(&body).await;
    assert_eq!(
        normalize(events),
        vec![tool_call("foo", json!({"x": 1})), EmittedEvent::text(" done")]
    );
}

#[tokio::test]
async fn test_malformed_inline_call_is_dropped() {
    let body = sse(&[
        content("<|tool_call_begin|>bar<|tool_call_argument_begin|>not-json<|tool_call_end|>"),
        content("still here"),
    ]);
    let (summary, events) = decode(&body).await;
    assert_eq!(events, vec![EmittedEvent::text("still here")]);
    assert_eq!(summary.status, StreamStatus::Completed);
}

#[tokio::test]
async fn test_same_call_on_both_channels_is_emitted_once() {
    let body = sse(&[
        content("<|tool_call_begin|>search<|tool_call_argument_begin|>{\"q\": \"x\"}<|tool_call_end|>"),
        json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "function": {"name": "search", "arguments": "{\"q\":\"x\"}"}}
        ]}}]}),
        json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}),
    ]);
    let (_, events) = decode(&body).await;
    assert_eq!(normalize(events), vec![tool_call("search", json!({"q": "x"}))]);
}

#[tokio::test]
async fn test_section_markers_never_reach_text() {
    let body = sse(&[
        content("a<|tool_calls_section_begin|>"),
        content("<|tool_call_begin|>ls:0<|tool_call_end|>"),
        content("<|tool_calls_section_end|>b"),
    ]);
    let (_, events) = decode(&body).await;
    assert_eq!(
        normalize(events),
        vec![
            EmittedEvent::text("a"),
            tool_call("ls", json!({})),
            EmittedEvent::text("b"),
        ]
    );
}

#[tokio::test]
async fn test_marker_split_at_every_offset() {
    let text = "before <|tool_call_begin|>get_weather<|tool_call_argument_begin|>{\"city\":\"Paris\"}<|tool_call_end|> after";
    let expected = vec![
        EmittedEvent::text("before "),
        tool_call("get_weather", json!({"city": "Paris"})),
        EmittedEvent::text(" after"),
    ];

    // Split inside the text content, across two payloads
    for cut in 0..=text.len() {
        let body = sse(&[content(&text[..cut]), content(&text[cut..])]);
        let (_, events) = decode(&body).await;
        assert_eq!(normalize(events), expected, "content split at {}", cut);
    }

    // Split inside the raw byte stream
    let body = sse(&[content(text)]);
    let bytes = body.as_bytes();
    for cut in 0..=bytes.len() {
        let mut session = Session::new(SessionOptions::default());
        let (result, events) = decode_chunks(&mut session, split_at(bytes, &[cut])).await;
        assert!(result.is_ok(), "byte split at {}", cut);
        assert_eq!(normalize(events), expected, "byte split at {}", cut);
    }
}

#[tokio::test]
async fn test_marker_split_into_three_chunks_at_every_cut_pair() {
    let text = "x<|tool_calls_section_begin|><|tool_call_begin|>ls:0<|tool_call_argument_begin|>{\"p\":\"/\"}<|tool_call_end|><|tool_calls_section_end|>y";
    let expected = vec![
        EmittedEvent::text("x"),
        tool_call("ls", json!({"p": "/"})),
        EmittedEvent::text("y"),
    ];

    for first in 0..=text.len() {
        for second in first..=text.len() {
            let body = sse(&[
                content(&text[..first]),
                content(&text[first..second]),
                content(&text[second..]),
            ]);
            let (_, events) = decode(&body).await;
            assert_eq!(
                normalize(events),
                expected,
                "content split at {} and {}",
                first,
                second
            );
        }
    }
}

#[tokio::test]
async fn test_one_byte_chunks_decode_like_a_single_chunk() {
    let text = "before <|tool_call_begin|>get_weather<|tool_call_argument_begin|>{\"city\":\"Paris\"}<|tool_call_end|> after";
    let body = sse(&[content(&text[..30]), content(&text[30..])]);
    let bytes = body.as_bytes();
    let cuts: Vec<usize> = (1..bytes.len()).collect();

    let mut session = Session::new(SessionOptions::default());
    let (result, events) = decode_chunks(&mut session, split_at(bytes, &cuts)).await;
    assert!(result.is_ok());
    assert_eq!(
        normalize(events),
        vec![
            EmittedEvent::text("before "),
            tool_call("get_weather", json!({"city": "Paris"})),
            EmittedEvent::text(" after"),
        ]
    );
}

#[tokio::test]
async fn test_multibyte_text_split_at_every_byte() {
    let body = sse(&[content("héllo 🌍")]);
    let bytes = body.as_bytes();
    for cut in 0..=bytes.len() {
        let mut session = Session::new(SessionOptions::default());
        let (result, events) = decode_chunks(&mut session, split_at(bytes, &[cut])).await;
        assert!(result.is_ok());
        assert_eq!(events, vec![EmittedEvent::text("héllo 🌍")], "split at {}", cut);
    }
}

#[tokio::test]
async fn test_incomplete_arguments_are_not_emitted_early() {
    let body = sse(&[
        json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "function": {"name": "write", "arguments": "{\"path\":\"a\","}}
        ]}}]}),
        content("between"),
        json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "function": {"arguments": "\"body\":[1,2]}"}}
        ]}}]}),
    ]);
    let (_, events) = decode(&body).await;
    assert_eq!(
        normalize(events),
        vec![
            EmittedEvent::text("between"),
            tool_call("write", json!({"path": "a", "body": [1, 2]})),
        ]
    );
}

#[tokio::test]
async fn test_noise_lines_are_ignored() {
    let body = format!(
        ": keep-alive\n\nevent: message\ndata: {{not json\n\ndata: {}\n\n{}",
        content("ok"),
        "data: [DONE]\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n"
    );
    let (_, events) = decode(&body).await;
    assert_eq!(events, vec![EmittedEvent::text("ok")]);
}

#[tokio::test]
async fn test_stream_without_done_still_flushes() {
    let body = format!(
        "data: {}\n\ndata: {}\n",
        content("tail <"),
        json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "function": {"name": "ping"}}
        ]}}]})
    );
    let (summary, events) = decode(&body).await;
    assert_eq!(
        normalize(events),
        vec![EmittedEvent::text("tail <"), tool_call("ping", json!({}))]
    );
    assert_eq!(summary.finish_reason, None);
}

#[tokio::test]
async fn test_incomplete_call_at_tool_calls_finish_is_fatal() {
    let body = sse(&[
        content("Let me look."),
        json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "function": {"name": "search", "arguments": "{\"q\":"}}
        ]}}]}),
        json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}),
    ]);
    let mut session = Session::new(SessionOptions::default());
    let (result, events) = decode_chunks(&mut session, vec![body.into_bytes()]).await;

    match result {
        Err(e) => match e.inner {
            ChatDeltaError::InvalidToolCallPayload { index, name, .. } => {
                assert_eq!(index, 0);
                assert_eq!(name, "search");
            }
            other => panic!("Expected InvalidToolCallPayload, got {:?}", other),
        },
        Ok(summary) => panic!("Expected error, got {:?}", summary),
    }
    // Earlier output is not retracted
    assert_eq!(events, vec![EmittedEvent::text("Let me look.")]);
    assert!(!session.accumulator().has_pending());
}

#[tokio::test]
async fn test_dangling_call_at_clean_stop_is_dropped() {
    let body = sse(&[
        json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "function": {"name": "search", "arguments": "{\"q\":"}}
        ]}}]}),
        json!({"choices": [{"delta": {"content": "done"}, "finish_reason": "stop"}]}),
    ]);
    let (summary, events) = decode(&body).await;
    assert_eq!(events, vec![EmittedEvent::text("done")]);
    assert_eq!(summary.finish_reason, Some(FinishReason::NormalStop));
}

#[tokio::test]
async fn test_reasoning_follows_session_capability() {
    let body = sse(&[
        json!({"choices": [{"delta": {"reasoning_content": "thinking", "reasoning_id": "r1"}}]}),
        content("answer"),
    ]);

    let (_, events) = decode(&body).await;
    assert_eq!(events, vec![EmittedEvent::text("answer")]);

    let mut session = Session::new(SessionOptions { reasoning: true });
    let (result, events) = decode_chunks(&mut session, vec![body.into_bytes()]).await;
    assert!(result.is_ok());
    assert_eq!(
        events,
        vec![
            EmittedEvent::Reasoning {
                content: "thinking".to_string(),
                id: Some("r1".to_string()),
                metadata: None,
            },
            EmittedEvent::text("answer"),
        ]
    );
}

#[tokio::test]
async fn test_session_is_reusable_after_stream_end() {
    let mut session = Session::new(SessionOptions::default());
    let first = sse(&[
        content("<|tool_call_begin|>ls<|tool_call_argument_begin|>{\"p\":\"/\"}<|tool_call_end|>"),
        content("<|tool_call_begin|>half"),
    ]);
    let (result, events) = decode_chunks(&mut session, vec![first.into_bytes()]).await;
    assert!(result.is_ok());
    assert_eq!(normalize(events), vec![tool_call("ls", json!({"p": "/"}))]);

    // The same call in a new request is not a duplicate, and no header leaks over
    let second = sse(&[
        content("<|tool_call_begin|>ls<|tool_call_argument_begin|>{\"p\":\"/\"}<|tool_call_end|>"),
        content("fresh"),
    ]);
    let (result, events) = decode_chunks(&mut session, vec![second.into_bytes()]).await;
    match result {
        Ok(summary) => assert_eq!(summary.events_emitted, 2),
        Err(e) => panic!("Unexpected error: {}", e),
    }
    assert_eq!(
        normalize(events),
        vec![
            tool_call("ls", json!({"p": "/"})),
            EmittedEvent::text("fresh"),
        ]
    );
}

#[tokio::test]
async fn test_cancellation_emits_no_partial_call() {
    // The body never ends; only cancellation can stop the session
    let first = format!(
        "data: {}\n\n",
        content("hi <|tool_call_begin|>f<|tool_call_argument_begin|>{\"a\":1")
    );
    let body = stream::iter(vec![Ok::<Bytes, std::io::Error>(Bytes::from(first))])
        .chain(stream::pending());
    let frames = Box::pin(frame_stream(body));

    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    let handle = tokio::spawn(async move {
        let mut session = Session::new(SessionOptions::default());
        session.run(frames, &task_cancel, &tx).await
    });

    assert_eq!(rx.recv().await, Some(EmittedEvent::text("hi ")));
    cancel.cancel();

    let summary = match handle.await {
        Ok(Ok(summary)) => summary,
        Ok(Err(e)) => panic!("Unexpected error: {}", e),
        Err(e) => panic!("Task failed: {}", e),
    };
    assert_eq!(summary.status, StreamStatus::Cancelled);
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn test_cancellation_unblocks_a_full_channel() {
    let body = sse(&[content("one"), content("two"), content("three")]);
    let frames = frame_stream(stream::iter(vec![Ok::<Bytes, std::io::Error>(Bytes::from(
        body,
    ))]));
    tokio::pin!(frames);

    // The receiver stays alive but is never read
    let (tx, mut rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let mut session = Session::new(SessionOptions::default());
    let run = session.run(frames, &cancel, &tx);
    match tokio::time::timeout(Duration::from_secs(5), run).await {
        Ok(Ok(summary)) => assert_eq!(summary.status, StreamStatus::Cancelled),
        Ok(Err(e)) => panic!("Unexpected error: {}", e),
        Err(_) => panic!("run stayed blocked on a full channel after cancellation"),
    }
    assert_eq!(rx.try_recv().ok(), Some(EmittedEvent::text("one")));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_closed_receiver_stops_the_stream() {
    let body = sse(&[content("one"), content("two")]);
    let frames = frame_stream(stream::iter(vec![Ok::<Bytes, std::io::Error>(Bytes::from(
        body,
    ))]));
    tokio::pin!(frames);

    let (tx, rx) = mpsc::channel(4);
    drop(rx);
    let mut session = Session::new(SessionOptions::default());
    match session.run(frames, &CancellationToken::new(), &tx).await {
        Ok(summary) => assert_eq!(summary.status, StreamStatus::Cancelled),
        Err(e) => panic!("Unexpected error: {}", e),
    }
}
