use futures::StreamExt;
use ondevice_ai::agent::providers::MockProvider;
use ondevice_ai::agent::ProviderKind;
use ondevice_ai::error::RagError;
use ondevice_ai::rag::{build_system_prompt, RagService};
use ondevice_ai::test_utils::{hashing_memory, scripted_provider};
use std::sync::Arc;

#[tokio::test]
async fn empty_store_degrades_gracefully() {
    let provider = scripted_provider(["I don't know that yet."]);
    let rag = RagService::new(hashing_memory(), ProviderKind::Mock)
        .with_provider(ProviderKind::Mock, Arc::new(provider));

    let answer = rag.answer_with_rag("Where did I park?").await.unwrap();
    assert_eq!(answer, "I don't know that yet.");
}

#[tokio::test]
async fn context_count_bounds_the_snippets() {
    let memory = hashing_memory();
    for fact in [
        "Parked on level 3 of the garage",
        "The garage closes at midnight",
        "The car is a blue hatchback",
        "Garage ticket is in the glovebox",
    ] {
        memory.add_memory(fact, None).await.unwrap();
    }
    let provider = scripted_provider(["Level 3."]);
    let rag = RagService::new(memory, ProviderKind::Mock)
        .with_provider(ProviderKind::Mock, Arc::new(provider.clone()));

    rag.answer_with_context("Where in the garage did I park?", 2)
        .await
        .unwrap();

    let system_prompt = &provider.prompts()[0].system_prompt;
    assert!(system_prompt.contains("[1] "));
    assert!(system_prompt.contains("[2] "));
    assert!(!system_prompt.contains("[3] "));
    assert!(system_prompt.contains("say so explicitly"));
}

#[tokio::test]
async fn custom_prompt_keeps_caller_instructions() {
    let memory = hashing_memory();
    memory.add_memory("Allergic to peanuts", None).await.unwrap();
    let provider = scripted_provider(["Avoid peanuts."]);
    let rag = RagService::new(memory, ProviderKind::Mock)
        .with_provider(ProviderKind::Mock, Arc::new(provider.clone()));

    rag.answer_with_custom_prompt("Any allergies?", "Answer as a nutritionist.", true)
        .await
        .unwrap();

    let system_prompt = &provider.prompts()[0].system_prompt;
    assert!(system_prompt.starts_with("Answer as a nutritionist."));
    assert!(system_prompt.contains("Allergic to peanuts"));
}

#[tokio::test]
async fn provider_failures_surface_as_generation_errors() {
    let rag = RagService::new(hashing_memory(), ProviderKind::OpenAI).with_provider(
        ProviderKind::OpenAI,
        Arc::new(MockProvider::failing("401 unauthorized")),
    );

    match rag.answer_with_rag("hello").await {
        Err(RagError::Generation(err)) => assert!(err.to_string().contains("401")),
        other => panic!("expected generation error, got {:?}", other.map(|_| ())),
    }

    assert!(matches!(
        rag.stream_with_rag("hello").await,
        Err(RagError::Generation(_))
    ));
}

#[tokio::test]
async fn preferred_provider_switch_is_in_memory_only() {
    let rag = RagService::new(hashing_memory(), ProviderKind::Anthropic)
        .with_provider(
            ProviderKind::Anthropic,
            Arc::new(MockProvider::new("claude says hi").reporting_as(ProviderKind::Anthropic)),
        )
        .with_provider(
            ProviderKind::Grok,
            Arc::new(MockProvider::new("grok says hi").reporting_as(ProviderKind::Grok)),
        );

    assert_eq!(
        rag.available_providers(),
        vec![ProviderKind::Anthropic, ProviderKind::Grok]
    );
    assert_eq!(rag.answer_with_rag("hi").await.unwrap(), "claude says hi");

    rag.set_preferred_provider(ProviderKind::Grok);
    assert_eq!(rag.preferred_provider(), ProviderKind::Grok);
    assert_eq!(rag.answer_with_rag("hi").await.unwrap(), "grok says hi");
}

#[tokio::test]
async fn stream_can_be_abandoned_midway() {
    let provider = scripted_provider(["alpha beta gamma delta"]);
    let rag = RagService::new(hashing_memory(), ProviderKind::Mock)
        .with_provider(ProviderKind::Mock, Arc::new(provider));

    let mut stream = rag.stream_with_rag("letters").await.unwrap();
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first, "alpha ");
    drop(stream);
}

#[test]
fn system_prompt_numbers_context() {
    let prompt = build_system_prompt(
        "Be brief.",
        &["one".to_string(), "two".to_string()],
    );
    assert!(prompt.starts_with("Be brief."));
    assert!(prompt.contains("[1] one\n[2] two"));

    let bare = build_system_prompt("Be brief.", &[]);
    assert!(bare.contains("No saved context"));
}
