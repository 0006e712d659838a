//! Integration tests for the oceanbot library.
//! The live tests require OCEANBOT_BASE_URL to point at a running backend.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use futures::StreamExt;

    use oceanbot::store::SESSIONS_KEY;
    use oceanbot::{
        Backend, ChatController, ChatMessage, ChatMode, ChatSession, FileStore, GenerateOutcome,
        MemoryStore, NullRenderer, OceanBot, RenameResponse, ScriptedBackend, SessionStore,
        StreamStep, StudyResponse,
    };

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "oceanbot-it-{name}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[tokio::test]
    async fn test_live_streaming_response() {
        let Ok(base_url) = std::env::var("OCEANBOT_BASE_URL") else {
            eprintln!("Skipping test: OCEANBOT_BASE_URL not set");
            return;
        };

        let client = OceanBot::new(Some(base_url)).expect("Failed to create client");
        let stream = client
            .stream_chat(&[ChatMessage::user("What is the average depth of the ocean?")])
            .await;
        assert!(stream.is_ok(), "Stream request should succeed");
        let tokens: Vec<_> = stream.unwrap().collect().await;
        assert!(tokens.iter().all(|t| t.is_ok()));
    }

    #[tokio::test]
    async fn test_live_conversation_is_persisted() {
        let Ok(base_url) = std::env::var("OCEANBOT_BASE_URL") else {
            eprintln!("Skipping test: OCEANBOT_BASE_URL not set");
            return;
        };

        let client = OceanBot::new(Some(base_url)).expect("Failed to create client");
        let store = SessionStore::load(Box::new(MemoryStore::new())).unwrap();
        let controller = ChatController::new(Arc::new(client), store);
        let id = controller.new_session().unwrap();
        let outcome = controller
            .submit(&id, "Name one ocean current.", &mut NullRenderer)
            .await
            .unwrap();
        assert!(!matches!(outcome, GenerateOutcome::Busy));
        assert_eq!(controller.session(&id).unwrap().messages.len(), 2);
    }

    #[tokio::test]
    async fn sessions_survive_a_restart() {
        let dir = scratch_dir("restart");
        let backend = Arc::new(
            ScriptedBackend::new()
                .with_chat_tokens("Upwelling brings cold nutrient-rich water to the surface.")
                .with_rename(Ok(RenameResponse {
                    title: Some("Coastal Upwelling".to_string()),
                })),
        );

        let id = {
            let store = SessionStore::load(Box::new(FileStore::new(&dir))).unwrap();
            let controller = ChatController::new(backend.clone(), store);
            let id = controller.new_session().unwrap();
            let outcome = controller
                .submit(&id, "What is upwelling?", &mut NullRenderer)
                .await
                .unwrap();
            assert!(outcome.is_completed());
            id
        };

        let store = SessionStore::load(Box::new(FileStore::new(&dir))).unwrap();
        let controller = ChatController::new(backend, store);
        assert_eq!(controller.active(), Some(id.clone()));
        let session = controller.session(&id).unwrap();
        assert_eq!(session.title, "Coastal Upwelling");
        assert_eq!(
            session.messages,
            vec![
                ChatMessage::user("What is upwelling?"),
                ChatMessage {
                    visible_words: Some(
                        "Upwelling brings cold nutrient-rich water to the surface."
                            .split(' ')
                            .map(String::from)
                            .collect()
                    ),
                    ..ChatMessage::model("Upwelling brings cold nutrient-rich water to the surface.")
                },
            ]
        );

        let raw = std::fs::read_to_string(dir.join(format!("{SESSIONS_KEY}.json"))).unwrap();
        let parsed: Vec<ChatSession> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, controller.sessions());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn sessions_generate_independently() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .with_chat(Ok(vec![
                    StreamStep::token("slow"),
                    StreamStep::Pause(Duration::from_millis(20)),
                    StreamStep::token("answer"),
                ]))
                .with_study(Ok(StudyResponse {
                    response: Some("Salinity peaks in the subtropics.".to_string()),
                    ..StudyResponse::default()
                }))
                .with_rename(Ok(RenameResponse::default()))
                .with_rename(Ok(RenameResponse::default())),
        );
        let store = SessionStore::load(Box::new(MemoryStore::new())).unwrap();
        let controller = Arc::new(ChatController::new(backend.clone(), store));
        let chat = controller.new_session().unwrap();
        let study = controller.new_session().unwrap();
        controller.set_mode(&study, ChatMode::Study).unwrap();

        let chat_task = tokio::spawn({
            let controller = controller.clone();
            let chat = chat.clone();
            async move { controller.submit(&chat, "first", &mut NullRenderer).await }
        });
        let study_outcome = controller
            .submit(&study, "salinity by latitude", &mut NullRenderer)
            .await
            .unwrap();
        assert!(study_outcome.is_completed());
        assert!(chat_task.await.unwrap().unwrap().is_completed());

        assert_eq!(
            controller.session(&chat).unwrap().messages[1].text,
            "slow answer"
        );
        assert_eq!(
            controller.session(&study).unwrap().messages[1].text,
            "Salinity peaks in the subtropics."
        );
        assert_eq!(backend.rename_requests().len(), 2);
    }

    #[tokio::test]
    async fn cancel_all_stops_every_session() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .with_chat(Ok(vec![StreamStep::token("one"), StreamStep::Hang]))
                .with_chat(Ok(vec![StreamStep::token("two"), StreamStep::Hang])),
        );
        let store = SessionStore::load(Box::new(MemoryStore::new())).unwrap();
        let controller = Arc::new(ChatController::new(backend, store));
        let first = controller.new_session().unwrap();
        let second = controller.new_session().unwrap();

        let tasks: Vec<_> = [first.clone(), second.clone()]
            .into_iter()
            .map(|id| {
                let controller = controller.clone();
                tokio::spawn(async move { controller.submit(&id, "go", &mut NullRenderer).await })
            })
            .collect();
        while !(controller.is_in_flight(&first) && controller.is_in_flight(&second)) {
            tokio::task::yield_now().await;
        }

        assert_eq!(controller.cancel_all(), 2);
        for task in tasks {
            let outcome = task.await.unwrap().unwrap();
            assert!(matches!(outcome, GenerateOutcome::Cancelled));
        }
        assert!(!controller.cancel(&first));
        assert!(controller.sessions().iter().all(|s| !s.messages[1].is_error()));
    }
}
