//! 规格追踪集成测试：合并、进度、完成门控

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use intake::spec::{
        CompletionGate, ExtractionDelta, FieldKind, FieldRegistry, FieldValue, ProgressEvaluator,
        SessionState, SpecField, SpecMerger, Stage,
    };

    fn registry() -> Arc<FieldRegistry> {
        Arc::new(FieldRegistry::default())
    }

    fn all_required(confidence: f64) -> ExtractionDelta {
        ExtractionDelta::new()
            .with("project_type", FieldValue::text("全屋翻新"), confidence)
            .with("focus_areas", FieldValue::list(["厨房", "浴室"]), confidence)
            .with("budget_range", FieldValue::text("80-100万"), confidence)
            .with("style_preference", FieldValue::text("北欧简约"), confidence)
            .with("total_area", FieldValue::Number(30.0), confidence)
    }

    #[test]
    fn scenario_empty_state() {
        let registry = registry();
        let snapshot = ProgressEvaluator::new(&registry).evaluate(&SessionState::new());
        assert_eq!(snapshot.completed, 0);
        assert_eq!(snapshot.total_required, 5);
        assert_eq!(snapshot.percentage, 0);
        assert_eq!(snapshot.stage, "greeting");
        let ids: Vec<&str> = snapshot.missing_fields.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(
            ids,
            [
                "project_type",
                "focus_areas",
                "budget_range",
                "style_preference",
                "total_area",
                "timeline",
                "material_preference",
                "quality_level",
                "special_requirements",
            ]
        );
    }

    #[test]
    fn scenario_lower_confidence_keeps_value() {
        let merger = SpecMerger::new(registry());
        let state = Arc::new(SessionState::new());
        let first = merger.merge(
            &state,
            &ExtractionDelta::new().with("budget_range", FieldValue::text("x"), 0.9),
        );
        let second = merger.merge(
            &first.state,
            &ExtractionDelta::new().with("budget_range", FieldValue::text("y"), 0.5),
        );
        assert!(!second.changed);
        let entry = second.state.get("budget_range").unwrap();
        assert_eq!(entry.value, FieldValue::text("x"));
        assert!((entry.confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn scenario_all_required_complete() {
        let registry = registry();
        let merger = SpecMerger::new(registry.clone());
        let state = merger.merge(&Arc::new(SessionState::new()), &all_required(1.0)).state;

        let snapshot = ProgressEvaluator::new(&registry).evaluate(&state);
        assert_eq!(snapshot.percentage, 100);
        assert_eq!(snapshot.stage, "complete");
        assert!(snapshot.missing_fields.iter().all(|m| !m.required));

        let brief = CompletionGate::new(&registry).finalize("s1", &state).unwrap();
        assert_eq!(brief.session_id, "s1");
        assert_eq!(brief.style_preferences, ["北欧简约"]);
        assert_eq!(brief.key_requirements, ["厨房", "浴室"]);
        assert_eq!(brief.user_profile.get("budget_range"), Some(&FieldValue::text("80-100万")));
        assert_eq!(brief.fields.len(), 5);
    }

    #[test]
    fn scenario_one_required_missing() {
        let registry = registry();
        let merger = SpecMerger::new(registry.clone());
        let mut delta = all_required(0.95);
        delta.values.remove("total_area");
        let state = merger.merge(&Arc::new(SessionState::new()), &delta).state;

        let snapshot = ProgressEvaluator::new(&registry).evaluate(&state);
        assert_eq!(snapshot.percentage, 80);
        assert_eq!(snapshot.stage, "summary");

        let err = CompletionGate::new(&registry).finalize("s1", &state).unwrap_err();
        let ids: Vec<&str> = err.missing.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["total_area"]);
    }

    #[test]
    fn below_threshold_blocks_finalize() {
        let registry = registry();
        let merger = SpecMerger::new(registry.clone());
        let mut delta = all_required(1.0);
        delta.confidences.insert("project_type".to_string(), 0.5);
        let state = merger.merge(&Arc::new(SessionState::new()), &delta).state;

        let err = CompletionGate::new(&registry).finalize("s1", &state).unwrap_err();
        assert_eq!(err.missing.len(), 1);
        assert_eq!(err.missing[0].id, "project_type");
    }

    #[test]
    fn percentage_never_decreases() {
        let registry = registry();
        let merger = SpecMerger::new(registry.clone());
        let evaluator = ProgressEvaluator::new(&registry);
        let deltas = [
            ExtractionDelta::new().with("project_type", FieldValue::text("局部改造"), 0.8),
            ExtractionDelta::new().with("project_type", FieldValue::text("全屋翻新"), 0.3),
            ExtractionDelta::new().with_value("budget_range", FieldValue::text("大概50万")),
            ExtractionDelta::new().with("budget_range", FieldValue::text("50万"), 0.9),
            ExtractionDelta::new()
                .with("total_area", FieldValue::text(" 30 "), 0.75)
                .with("unknown_field", FieldValue::text("?"), 1.0),
            ExtractionDelta::new().with("total_area", FieldValue::text("不确定"), 0.99),
            ExtractionDelta::new(),
            all_required(0.1),
            all_required(0.9),
        ];

        let mut state = Arc::new(SessionState::new());
        let mut last = 0;
        for delta in &deltas {
            state = merger.merge(&state, delta).state;
            let snapshot = evaluator.evaluate(&state);
            assert!(snapshot.percentage >= last, "{} < {}", snapshot.percentage, last);
            assert!(snapshot
                .missing_fields
                .iter()
                .all(|m| state.confidence(&m.id).map_or(true, |c| c < m.min_confidence)));
            last = snapshot.percentage;
        }
        assert_eq!(last, 100);
        assert_eq!(state.get("total_area").unwrap().value, FieldValue::Number(30.0));
        assert!(state.get("unknown_field").is_none());
    }

    #[test]
    fn custom_registry_from_toml() {
        let registry = Arc::new(
            FieldRegistry::from_toml_str(
                r#"
                [[fields]]
                id = "rooms"
                label = "房间数量"
                category = "scope"
                kind = "number"
                priority = 1

                [[fields]]
                id = "notes"
                label = "备注"
                category = "misc"
                kind = "text"
                priority = 2
                required = false
                "#,
            )
            .unwrap(),
        );
        assert_eq!(registry.lookup("rooms").map(|f| f.kind), Some(FieldKind::Number));
        assert_eq!(registry.stages().first(), Some(&Stage::new("greeting", 0)));

        let state = SpecMerger::new(registry.clone())
            .merge(
                &Arc::new(SessionState::new()),
                &ExtractionDelta::new().with("rooms", FieldValue::text("3"), 0.9),
            )
            .state;
        let snapshot = ProgressEvaluator::new(&registry).evaluate(&state);
        assert_eq!(snapshot.percentage, 100);
        assert!(CompletionGate::new(&registry).finalize("s", &state).is_ok());
    }

    #[test]
    fn spec_field_builder_matches_registry_semantics() {
        let field = SpecField::new("a", "A", "x", FieldKind::Text, 1)
            .optional()
            .min_confidence(0.5);
        assert!(!field.required);
        assert!((field.min_confidence - 0.5).abs() < f64::EPSILON);
    }
}
