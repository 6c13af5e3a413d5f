mod common;

use carelens::answer::{AnswerError, AnswerSynthesizer, INSUFFICIENT_INFORMATION};
use common::{ScriptedGenerator, Workspace};
use std::sync::Arc;

fn synthesizer(workspace: &Workspace, generator: Arc<ScriptedGenerator>) -> AnswerSynthesizer {
    AnswerSynthesizer::new(workspace.index.clone(), workspace.embedder.clone(), generator)
        .with_top_k(2)
}

#[tokio::test]
async fn question_before_first_sync_is_not_ready() {
    let workspace = Workspace::new();
    let generator = Arc::new(ScriptedGenerator::new("unused"));

    let result = synthesizer(&workspace, generator.clone())
        .answer("What is the wait time?")
        .await;

    assert!(matches!(result, Err(AnswerError::NotReady)));
    assert!(generator.prompts().is_empty());
}

#[tokio::test]
async fn answer_cites_the_document_holding_the_fact() {
    let workspace = Workspace::new();
    let report_path = workspace.write_paginated(
        "urgences.pdf",
        "Emergency department report. The wait time is 45 minutes on average.",
    );
    workspace.write_paginated(
        "visites.pdf",
        "Visiting hours run from 14:00 to 20:00, two visitors per patient.",
    );
    workspace.coordinator.sync_all().await.expect("sync");

    let generator = Arc::new(ScriptedGenerator::new(
        "The wait time is 45 minutes according to the emergency department report.",
    ));
    let answer = synthesizer(&workspace, generator.clone())
        .answer("  What is the wait time?  ")
        .await
        .expect("answer");

    assert_eq!(answer.question, "What is the wait time?");
    assert!(answer.answer.contains("45 minutes"));
    assert_eq!(answer.sources[0].name, "urgences.pdf");
    assert_eq!(answer.sources[0].document, report_path.to_string_lossy());
    assert_eq!(answer.passages[0].name, "urgences.pdf");
    assert_eq!(answer.generation, 1);

    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("wait time is 45 minutes"));
    assert!(prompts[0].contains("What is the wait time?"));
}

#[tokio::test]
async fn empty_index_answers_without_generation() {
    let workspace = Workspace::new();
    workspace.coordinator.sync_all().await.expect("sync");
    let generator = Arc::new(ScriptedGenerator::new("unused"));

    let answer = synthesizer(&workspace, generator.clone())
        .answer("Where is the pharmacy?")
        .await
        .expect("answer");

    assert_eq!(answer.answer, INSUFFICIENT_INFORMATION);
    assert!(answer.sources.is_empty());
    assert!(generator.prompts().is_empty());
}

#[tokio::test]
async fn answers_follow_the_latest_generation() {
    let workspace = Workspace::new();
    workspace.write_paginated("urgences.pdf", "The wait time is 45 minutes.");
    workspace.coordinator.sync_all().await.expect("first sync");
    workspace.write_paginated("urgences.pdf", "The wait time is 20 minutes after reorganisation.");
    workspace.coordinator.sync_all().await.expect("second sync");

    let generator = Arc::new(ScriptedGenerator::new("20 minutes."));
    let answer = synthesizer(&workspace, generator.clone())
        .answer("What is the wait time?")
        .await
        .expect("answer");

    assert_eq!(answer.generation, 2);
    let prompt = &generator.prompts()[0];
    assert!(prompt.contains("20 minutes"));
    assert!(!prompt.contains("45 minutes"));
}
