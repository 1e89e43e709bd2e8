//! 编排器集成测试：流式回合、标记过滤、失败与取消、会话串行化、完成检查

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use intake::conversation::{Orchestrator, TurnEvent, TurnFailure, TurnSettings};
    use intake::core::IntakeError;
    use intake::llm::{MockCollaborator, ScriptedTurn, DEFAULT_PERSONA};
    use intake::spec::{ExtractionDelta, FieldRegistry, FieldValue, SpecMerger};
    use intake::store::{EventQuery, MemoryStateStore, Severity, SqliteStateStore, StateStore};

    fn setup(turns: Vec<ScriptedTurn>) -> (Orchestrator, Arc<MemoryStateStore>, Arc<MockCollaborator>) {
        setup_with(turns, TurnSettings::default())
    }

    fn setup_with(
        turns: Vec<ScriptedTurn>,
        settings: TurnSettings,
    ) -> (Orchestrator, Arc<MemoryStateStore>, Arc<MockCollaborator>) {
        let registry = Arc::new(FieldRegistry::default());
        let store = Arc::new(MemoryStateStore::default());
        let mock = Arc::new(MockCollaborator::with_script(turns));
        let orch = Orchestrator::with_options(
            registry.clone(),
            store.clone(),
            mock.clone(),
            SpecMerger::new(registry),
            DEFAULT_PERSONA.to_string(),
            settings,
        );
        (orch, store, mock)
    }

    fn visible_text(events: &[TurnEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                TurnEvent::Chunk(c) if !c.is_complete => Some(c.chunk.as_str()),
                _ => None,
            })
            .collect()
    }

    fn terminal_count(events: &[TurnEvent]) -> usize {
        events.iter().filter(|e| e.is_terminal()).count()
    }

    fn failure_reason(events: &[TurnEvent]) -> Option<TurnFailure> {
        match events.last() {
            Some(TurnEvent::Error { reason, .. }) => Some(*reason),
            _ => None,
        }
    }

    #[tokio::test]
    async fn complete_event_reflects_merged_state() {
        let (orch, store, _) = setup(vec![ScriptedTurn::reply(["您好！", "想装修哪里？"]).with_delta(
            ExtractionDelta::new()
                .with("project_type", FieldValue::text("全屋翻新"), 0.9)
                .with("budget_range", FieldValue::text("80万"), 0.85),
        )]);

        let (events, result) = orch.submit("s1", "想全屋翻新，预算80万").collect().await;
        let snapshot = result.unwrap();
        assert_eq!(snapshot.percentage, 40);
        assert_eq!(terminal_count(&events), 1);
        assert_eq!(visible_text(&events), "您好！想装修哪里？");

        let Some(TurnEvent::Chunk(last)) = events.last() else {
            panic!("expected complete chunk");
        };
        assert!(last.is_complete);
        let meta = last.metadata.as_ref().unwrap();
        assert_eq!(meta.progress, 40);
        assert_eq!(meta.stage, "assessment");
        assert!(meta.persisted);
        assert!(meta.missing_fields.iter().all(|m| m.id != "project_type"));
        let full = meta.full_state.as_ref().unwrap();
        assert_eq!(full.get("budget_range").unwrap().value, FieldValue::text("80万"));

        let stored = store.get_current_state("s1").await.unwrap();
        assert_eq!(stored.len(), 2);
        let history = store.history("s1", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "您好！想装修哪里？");

        let progress = orch.progress("s1").await.unwrap();
        assert_eq!(progress, snapshot);

        let logged = orch.events("s1", &EventQuery::default()).await.unwrap();
        assert!(logged.iter().any(|e| e.kind == "turn_completed"));
    }

    #[tokio::test]
    async fn markers_never_reach_client() {
        let (orch, store, mock) = setup(vec![ScriptedTurn::reply([
            "给您看看效果：",
            "[GENERATE_",
            "IMAGE: 北欧风格",
            "厨房]",
            "您觉得如何？[GENERATE_IMAGE]",
        ])]);

        let (events, result) = orch.submit("s1", "给我看看").collect().await;
        assert!(result.is_ok());
        for event in &events {
            if let TurnEvent::Chunk(c) = event {
                assert!(!c.chunk.contains("GENERATE_IMAGE"), "leaked {:?}", c.chunk);
            }
        }
        assert_eq!(visible_text(&events), "给您看看效果：您觉得如何？");

        let asset_pos = events
            .iter()
            .position(|e| matches!(e, TurnEvent::Asset { .. }))
            .expect("asset event");
        assert!(asset_pos < events.len() - 1);
        let TurnEvent::Asset { description, url } = &events[asset_pos] else {
            unreachable!();
        };
        assert_eq!(description, "北欧风格厨房");
        assert!(url.starts_with("https://placehold.co/"));
        assert_eq!(mock.asset_requests(), ["北欧风格厨房"]);

        let history = store.history("s1", 10).await.unwrap();
        assert_eq!(history[1].content, "给您看看效果：您觉得如何？");
    }

    #[tokio::test]
    async fn transport_failure_writes_nothing() {
        let delta = ExtractionDelta::new().with("project_type", FieldValue::text("x"), 1.0);
        let (orch, store, _) = setup(vec![
            ScriptedTurn::fail_on_start(),
            ScriptedTurn::reply(["部分", "回复", "丢失"])
                .failing_after(1)
                .with_delta(delta),
        ]);

        for _ in 0..2 {
            let (events, result) = orch.submit("s1", "你好").collect().await;
            assert!(matches!(result, Err(IntakeError::Transport(_))));
            assert_eq!(terminal_count(&events), 1);
            assert_eq!(failure_reason(&events), Some(TurnFailure::Transport));
            let TurnEvent::Error { message, .. } = events.last().unwrap() else {
                unreachable!();
            };
            assert!(!message.is_empty());
        }

        assert!(store.get_current_state("s1").await.unwrap().is_empty());
        assert!(store.history("s1", 10).await.unwrap().is_empty());
        let failures = orch
            .events("s1", &EventQuery { severity: Some(Severity::Error), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().all(|e| e.kind == "turn_failed"));
    }

    #[tokio::test]
    async fn cancelled_turn_writes_nothing() {
        let delta = ExtractionDelta::new().with("project_type", FieldValue::text("x"), 1.0);
        let fragments: Vec<String> = (0..20).map(|i| format!("片段{}", i)).collect();
        let (orch, store, _) = setup(vec![ScriptedTurn::reply(fragments)
            .with_delay(Duration::from_millis(20))
            .with_delta(delta)]);

        let mut handle = orch.submit("s1", "你好");
        let first = handle.next().await.unwrap();
        assert!(matches!(first, TurnEvent::Chunk(_)));
        assert!(orch.cancel("s1").await);

        let (events, result) = handle.collect().await;
        assert!(matches!(result, Err(IntakeError::Cancelled)));
        assert_eq!(failure_reason(&events), Some(TurnFailure::Cancelled));
        assert!(store.get_current_state("s1").await.unwrap().is_empty());
        assert!(store.history("s1", 10).await.unwrap().is_empty());

        let logged = orch.events("s1", &EventQuery::default()).await.unwrap();
        assert!(logged.iter().any(|e| e.kind == "turn_cancelled"));
    }

    #[tokio::test]
    async fn client_disconnect_cancels_turn() {
        let delta = ExtractionDelta::new().with("project_type", FieldValue::text("x"), 1.0);
        let fragments: Vec<String> = (0..20).map(|i| format!("f{}", i)).collect();
        let (orch, store, _) = setup(vec![ScriptedTurn::reply(fragments)
            .with_delay(Duration::from_millis(20))
            .with_delta(delta)]);

        let mut handle = orch.submit("s1", "你好");
        handle.next().await.unwrap();
        drop(handle.events);

        let result = handle.join.await.unwrap();
        assert!(matches!(result, Err(IntakeError::Cancelled)));
        assert!(store.get_current_state("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn extraction_failure_still_completes() {
        let (orch, store, _) = setup(vec![ScriptedTurn::reply(["好的"]).with_extraction_error()]);

        let (events, result) = orch.submit("s1", "随便聊聊").collect().await;
        let snapshot = result.unwrap();
        assert_eq!(snapshot.percentage, 0);
        assert!(events.last().unwrap().is_terminal());
        assert!(matches!(events.last(), Some(TurnEvent::Chunk(c)) if c.is_complete));
        assert_eq!(store.history("s1", 10).await.unwrap().len(), 2);

        let warnings = orch
            .events("s1", &EventQuery { severity: Some(Severity::Warning), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(warnings[0].kind, "extraction_failed");
    }

    #[tokio::test]
    async fn turns_for_one_session_are_serialized() {
        let (orch, _, mock) = setup(vec![
            ScriptedTurn::reply(["第一", "轮"])
                .with_delay(Duration::from_millis(30))
                .with_delta(ExtractionDelta::new().with("project_type", FieldValue::text("局部改造"), 0.9)),
            ScriptedTurn::reply(["第二轮"]),
        ]);

        let mut first = orch.submit("s1", "一");
        first.next().await.unwrap();
        let second = orch.submit("s1", "二");
        assert!(matches!(
            orch.try_submit("s1", "三").await,
            Err(IntakeError::TurnInProgress(_))
        ));

        let (_, r1) = first.collect().await;
        let (_, r2) = second.collect().await;
        assert_eq!(r1.unwrap().percentage, 20);
        assert_eq!(r2.unwrap().percentage, 20);

        let requests = mock.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].history.is_empty());
        assert_eq!(requests[1].history.len(), 2);
        assert!(requests[1].system_prompt.contains("✓ 项目类型：局部改造"));
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let (orch, store, _) = setup(vec![
            ScriptedTurn::reply(["a"]).with_delta(
                ExtractionDelta::new().with("budget_range", FieldValue::text("30万"), 0.9),
            ),
            ScriptedTurn::reply(["b"]),
        ]);
        let (_, r1) = orch.submit("s1", "x").collect().await;
        let (_, r2) = orch.submit("s2", "y").collect().await;
        assert_eq!(r1.unwrap().percentage, 20);
        assert_eq!(r2.unwrap().percentage, 0);
        assert!(store.get_current_state("s2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn timeout_yields_error_event() {
        let settings = TurnSettings {
            timeout: Duration::from_millis(50),
            ..TurnSettings::default()
        };
        let (orch, store, _) = setup_with(
            vec![ScriptedTurn::reply(["慢", "慢"])
                .with_delay(Duration::from_millis(200))
                .with_delta(ExtractionDelta::new().with("project_type", FieldValue::text("x"), 1.0))],
            settings,
        );

        let (events, result) = orch.submit("s1", "你好").collect().await;
        assert!(matches!(result, Err(IntakeError::Timeout(_))));
        assert_eq!(failure_reason(&events), Some(TurnFailure::Timeout));
        assert!(store.get_current_state("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_window_is_bounded() {
        let settings = TurnSettings {
            history_limit: 4,
            ..TurnSettings::default()
        };
        let (orch, _, mock) = setup_with(vec![], settings);
        for i in 0..4 {
            let (_, r) = orch.submit("s1", format!("消息{}", i)).collect().await;
            assert!(r.is_ok());
        }
        let requests = mock.requests();
        assert_eq!(requests.last().unwrap().history.len(), 4);
        assert_eq!(requests.last().unwrap().history[0].content, "消息1");
    }

    #[tokio::test]
    async fn finalize_requires_all_required_fields() {
        let (orch, _, _) = setup(vec![
            ScriptedTurn::reply(["好"]).with_delta(
                ExtractionDelta::new()
                    .with("project_type", FieldValue::text("全屋翻新"), 0.95)
                    .with("focus_areas", FieldValue::list(["厨房"]), 0.9)
                    .with("budget_range", FieldValue::text("100万"), 0.9)
                    .with("style_preference", FieldValue::text("现代"), 0.9),
            ),
            ScriptedTurn::reply(["好"]).with_delta(
                ExtractionDelta::new().with("total_area", FieldValue::Number(45.0), 0.9),
            ),
        ]);

        orch.submit("s1", "第一轮").collect().await.1.unwrap();
        match orch.finalize("s1").await {
            Err(IntakeError::Validation(e)) => {
                let ids: Vec<&str> = e.missing.iter().map(|m| m.id.as_str()).collect();
                assert_eq!(ids, ["total_area"]);
            }
            other => panic!("expected validation error, got {:?}", other.map(|b| b.session_id)),
        }

        let snapshot = orch.submit("s1", "45平").collect().await.1.unwrap();
        assert_eq!(snapshot.percentage, 100);
        assert_eq!(snapshot.stage, "complete");

        let brief = orch.finalize("s1").await.unwrap();
        let again = orch.finalize("s1").await.unwrap();
        assert_eq!(brief.fields, again.fields);
        assert_eq!(brief.key_requirements, ["厨房"]);
        assert_eq!(brief.style_preferences, ["现代"]);

        let logged = orch.events("s1", &EventQuery::default()).await.unwrap();
        assert!(logged.iter().any(|e| e.kind == "finalize_rejected"));
        assert_eq!(logged.iter().filter(|e| e.kind == "finalized").count(), 2);
    }

    #[tokio::test]
    async fn sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intake.db");
        let registry = Arc::new(FieldRegistry::default());

        {
            let store = Arc::new(SqliteStateStore::open(&path).unwrap());
            let mock = Arc::new(MockCollaborator::with_script([ScriptedTurn::reply(["收到"]).with_delta(
                ExtractionDelta::new().with("style_preference", FieldValue::text("日式"), 0.8),
            )]));
            let orch = Orchestrator::new(registry.clone(), store, mock);
            let (_, result) = orch.submit("s1", "喜欢日式").collect().await;
            assert_eq!(result.unwrap().percentage, 20);
        }

        let store = SqliteStateStore::open(&path).unwrap();
        let state = store.get_current_state("s1").await.unwrap();
        assert_eq!(state.get("style_preference").unwrap().value, FieldValue::text("日式"));
        assert_eq!(store.history("s1", 10).await.unwrap().len(), 2);
    }
}
