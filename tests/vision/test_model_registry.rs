// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Model registry tests
//!
//! Load coalescing, role status and release of superseded models.

use super::common::*;
use fabstir_doc_vision::vision::{
    DetectionVariant, ModelRegistry, ModelRole, RecognitionVariant, RoleStatus, VisionError,
};
use std::sync::Arc;

#[cfg(test)]
mod model_registry_tests {
    use super::*;

    fn loader() -> Arc<FakeLoader> {
        let loader = FakeLoader::new();
        loader
            .with_graph("db_mobilenet_v2", FixedHeatmapGraph::new(heatmap_with(&[], 0.0)))
            .with_graph("db_resnet50", FixedHeatmapGraph::new(heatmap_with(&[], 0.0)))
            .with_graph("crnn_vgg16_bn", TextGraph::new(&["x"]))
            .with_graph("master", TextGraph::new(&["y"]));
        loader
    }

    /// Test 1: Status moves Unloaded -> Loading -> Ready
    #[tokio::test]
    async fn test_status_while_loading() {
        let gate = Gate::new();
        let loader = loader();
        loader.gate_load("crnn_vgg16_bn", gate.clone());
        let registry = Arc::new(ModelRegistry::new(loader.clone()));
        let config = RecognitionVariant::CrnnVgg16Bn.config();

        assert_eq!(registry.status(ModelRole::Recognition), RoleStatus::Unloaded);

        let task = {
            let registry = registry.clone();
            let config = config.clone();
            tokio::spawn(async move { registry.ensure_loaded(ModelRole::Recognition, &config).await })
        };

        gate.wait_entered().await;
        assert_eq!(
            registry.status(ModelRole::Recognition),
            RoleStatus::Loading(config.clone())
        );
        assert!(registry.current(ModelRole::Recognition).is_none());

        gate.open();
        task.await.unwrap().unwrap();
        assert_eq!(registry.status(ModelRole::Recognition), RoleStatus::Ready(config));
    }

    /// Test 2: Callers arriving during a load share it
    #[tokio::test]
    async fn test_pending_load_is_shared() {
        let gate = Gate::new();
        let loader = loader();
        loader.gate_load("db_mobilenet_v2", gate.clone());
        let registry = Arc::new(ModelRegistry::new(loader.clone()));
        let config = DetectionVariant::DbMobilenetV2.config();

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let registry = registry.clone();
                let config = config.clone();
                tokio::spawn(async move { registry.ensure_loaded(ModelRole::Detection, &config).await })
            })
            .collect();

        gate.wait_entered().await;
        tokio::task::yield_now().await;
        gate.open();

        let mut generations = Vec::new();
        for task in tasks {
            generations.push(task.await.unwrap().unwrap().generation());
        }

        assert_eq!(loader.loads_of(ModelRole::Detection, "db_mobilenet_v2"), 1);
        assert!(generations.windows(2).all(|w| w[0] == w[1]));
    }

    /// Test 3: A config change while loading wins over the pending load
    #[tokio::test]
    async fn test_config_change_during_load() {
        let gate = Gate::new();
        let loader = loader();
        loader.gate_load("db_mobilenet_v2", gate.clone());
        let registry = Arc::new(ModelRegistry::new(loader.clone()));

        let first = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .ensure_loaded(ModelRole::Detection, &DetectionVariant::DbMobilenetV2.config())
                    .await
            })
        };
        gate.wait_entered().await;

        let second = registry
            .ensure_loaded(ModelRole::Detection, &DetectionVariant::DbResnet50.config())
            .await
            .unwrap();
        gate.open();

        assert_eq!(
            first.await.unwrap().unwrap_err(),
            VisionError::StaleModel { role: ModelRole::Detection }
        );
        assert!(!second.is_stale());
        assert_eq!(
            registry.current(ModelRole::Detection).unwrap().config().variant,
            "db_resnet50"
        );
    }

    /// Test 4: Swapping one role leaves the other untouched
    #[tokio::test]
    async fn test_swap_is_per_role() {
        let loader = loader();
        let registry = ModelRegistry::new(loader.clone());

        let reco = registry
            .ensure_loaded(ModelRole::Recognition, &RecognitionVariant::CrnnVgg16Bn.config())
            .await
            .unwrap();
        registry
            .ensure_loaded(ModelRole::Detection, &DetectionVariant::DbMobilenetV2.config())
            .await
            .unwrap();
        registry
            .ensure_loaded(ModelRole::Detection, &DetectionVariant::DbResnet50.config())
            .await
            .unwrap();

        assert!(registry.is_current(&reco));
        assert_eq!(loader.total_loads(ModelRole::Recognition), 1);
        assert_eq!(loader.total_loads(ModelRole::Detection), 2);
    }

    /// Test 5: Load failure is reported and clears the role
    #[tokio::test]
    async fn test_load_failure_status() {
        let loader = loader();
        loader.fail("master");
        let registry = ModelRegistry::new(loader.clone());
        let config = RecognitionVariant::Master.config();

        let err = registry
            .ensure_loaded(ModelRole::Recognition, &config)
            .await
            .unwrap_err();

        assert!(err.is_model_load());
        match registry.status(ModelRole::Recognition) {
            RoleStatus::Failed(failed, reason) => {
                assert_eq!(failed, config);
                assert!(reason.contains("corrupt graph"));
            }
            other => panic!("unexpected status {:?}", other),
        }
    }
}
