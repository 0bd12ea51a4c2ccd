// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Extraction stage tests
//!
//! Heatmap extraction, box decoding and word recognition driven through
//! real model handles from the registry, with fake graphs.

use super::common::*;
use fabstir_doc_vision::vision::{
    BoundingBox, BoxDecoder, DetectionVariant, HeatmapExtractor, ModelRegistry, ModelRole,
    RecognitionVariant, VisionError, WordRecognizer, DETECTION_INPUT_SIZE, RECOGNITION_INPUT_SIZE,
};
use std::sync::Arc;

#[cfg(test)]
mod extraction_stage_tests {
    use super::*;

    fn registry_with(loader: Arc<FakeLoader>) -> ModelRegistry {
        ModelRegistry::new(loader)
    }

    // =============================================================================
    // HeatmapExtractor
    // =============================================================================

    /// Test 1: Heatmap comes back at detection resolution
    #[tokio::test]
    async fn test_heatmap_at_target_size() {
        let loader = FakeLoader::new();
        loader.with_graph("db_mobilenet_v2", FixedHeatmapGraph::new(heatmap_with(&THREE_WORDS, 0.9)));
        let registry = registry_with(loader);

        let model = registry
            .ensure_loaded(ModelRole::Detection, &DetectionVariant::DbMobilenetV2.config())
            .await
            .unwrap();
        let heatmap = HeatmapExtractor::default()
            .extract(Arc::new(document_image()), &model, DETECTION_INPUT_SIZE)
            .await
            .unwrap();

        assert_eq!(heatmap.size(), [512, 512]);
        assert_eq!(heatmap.range(), (0.0, 0.9));
    }

    /// Test 2: A superseded handle cannot produce a heatmap
    #[tokio::test]
    async fn test_stale_handle_is_rejected() {
        let loader = FakeLoader::new();
        loader
            .with_graph("db_mobilenet_v2", FixedHeatmapGraph::new(heatmap_with(&[], 0.0)))
            .with_graph("db_resnet50", FixedHeatmapGraph::new(heatmap_with(&[], 0.0)));
        let registry = registry_with(loader);

        let old = registry
            .ensure_loaded(ModelRole::Detection, &DetectionVariant::DbMobilenetV2.config())
            .await
            .unwrap();
        registry
            .ensure_loaded(ModelRole::Detection, &DetectionVariant::DbResnet50.config())
            .await
            .unwrap();

        let err = HeatmapExtractor::default()
            .extract(Arc::new(document_image()), &old, DETECTION_INPUT_SIZE)
            .await
            .unwrap_err();

        assert!(err.is_inference());
        assert_eq!(err, VisionError::StaleModel { role: ModelRole::Detection });
    }

    /// Test 3: Handle superseded while the graph runs
    #[tokio::test]
    async fn test_handle_superseded_during_inference() {
        let gate = Gate::new();
        let loader = FakeLoader::new();
        loader
            .with_graph(
                "db_mobilenet_v2",
                FixedHeatmapGraph::gated(heatmap_with(&THREE_WORDS, 0.9), gate.clone()),
            )
            .with_graph("db_resnet50", FixedHeatmapGraph::new(heatmap_with(&[], 0.0)));
        let registry = Arc::new(registry_with(loader));

        let model = registry
            .ensure_loaded(ModelRole::Detection, &DetectionVariant::DbMobilenetV2.config())
            .await
            .unwrap();

        let task = tokio::spawn(async move {
            HeatmapExtractor::default()
                .extract(Arc::new(document_image()), &model, DETECTION_INPUT_SIZE)
                .await
        });

        gate.wait_entered().await;
        registry
            .ensure_loaded(ModelRole::Detection, &DetectionVariant::DbResnet50.config())
            .await
            .unwrap();
        gate.open();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(VisionError::StaleModel { .. })));
    }

    // =============================================================================
    // BoxDecoder
    // =============================================================================

    /// Test 4: Same heatmap twice gives the same boxes in the same order
    #[tokio::test]
    async fn test_decoding_is_deterministic() {
        let loader = FakeLoader::new();
        loader.with_graph("db_mobilenet_v2", FixedHeatmapGraph::new(heatmap_with(&THREE_WORDS, 0.8)));
        let registry = registry_with(loader);
        let model = registry
            .ensure_loaded(ModelRole::Detection, &DetectionVariant::DbMobilenetV2.config())
            .await
            .unwrap();

        let image = Arc::new(document_image());
        let extractor = HeatmapExtractor::default();
        let decoder = BoxDecoder::default();

        let first = extractor.extract(image.clone(), &model, DETECTION_INPUT_SIZE).await.unwrap();
        let second = extractor.extract(image, &model, DETECTION_INPUT_SIZE).await.unwrap();

        let a = decoder.decode(&first, 0.3, (640, 480)).unwrap();
        let b = decoder.decode(&second, 0.3, (640, 480)).unwrap();

        assert_eq!(a.len(), 3);
        let geometry = |boxes: &[BoundingBox]| boxes.iter().map(|b| b.points).collect::<Vec<_>>();
        assert_eq!(geometry(&a), geometry(&b));
    }

    /// Test 5: Boxes are rescaled into original image coordinates
    #[test]
    fn test_boxes_rescaled_to_original() {
        let heatmap = fabstir_doc_vision::vision::Heatmap::new(heatmap_with(&THREE_WORDS, 0.9));
        let boxes = BoxDecoder::default().decode(&heatmap, 0.3, (640, 480)).unwrap();

        for bbox in &boxes {
            let (min_x, min_y, max_x, max_y) = bbox.bounds();
            assert!(min_x >= 0.0 && min_y >= 0.0);
            assert!(max_x <= 640.0 && max_y <= 480.0);
        }

        // First block starts at x=40 in a 512 wide heatmap: 40 * 1.25 minus the unclip offset
        let (min_x, _, _, _) = boxes[0].bounds();
        assert!(min_x < 50.0);
    }

    /// Test 6: Raising the threshold above every score yields nothing
    #[test]
    fn test_threshold_above_scores() {
        let heatmap = fabstir_doc_vision::vision::Heatmap::new(heatmap_with(&THREE_WORDS, 0.5));
        let boxes = BoxDecoder::default().decode(&heatmap, 0.6, (640, 480)).unwrap();
        assert!(boxes.is_empty());
    }

    // =============================================================================
    // WordRecognizer
    // =============================================================================

    async fn recognition_model(loader: Arc<FakeLoader>) -> fabstir_doc_vision::vision::ModelHandle {
        registry_with(loader)
            .ensure_loaded(ModelRole::Recognition, &RecognitionVariant::CrnnVgg16Bn.config())
            .await
            .unwrap()
    }

    fn boxes(count: usize) -> Vec<BoundingBox> {
        (0..count)
            .map(|i| {
                BoundingBox::from_rect(
                    format!("b{}", i),
                    10.0 + (i % 10) as f32 * 60.0,
                    10.0 + (i / 10) as f32 * 40.0,
                    50.0,
                    20.0,
                    0.9,
                    "#4363D8",
                )
            })
            .collect()
    }

    /// Test 7: One word per box, in box order
    #[tokio::test]
    async fn test_recognition_preserves_order_and_cardinality() {
        let loader = FakeLoader::new();
        loader.with_graph("crnn_vgg16_bn", TextGraph::new(&["Facture", "N°", "2024"]));
        let model = recognition_model(loader).await;

        let boxes = boxes(3);
        let words = WordRecognizer::default()
            .recognize_all(Arc::new(document_image()), &boxes, &model, RECOGNITION_INPUT_SIZE)
            .await
            .unwrap();

        assert_eq!(words.len(), boxes.len());
        let values: Vec<&str> = words.iter().map(|w| w.value.as_str()).collect();
        assert_eq!(values, vec!["Facture", "N°", "2024"]);
        for (word, bbox) in words.iter().zip(&boxes) {
            assert_eq!(word.id, bbox.id);
            assert_eq!(word.points, bbox.points);
            assert!((word.confidence - 1.0).abs() < 1e-5);
        }
    }

    /// Test 8: Degenerate crops become empty words without failing the batch
    #[tokio::test]
    async fn test_degenerate_crop_yields_empty_word() {
        let loader = FakeLoader::new();
        loader.with_graph("crnn_vgg16_bn", TextGraph::new(&["Total"]));
        let model = recognition_model(loader).await;

        let mut boxes = boxes(2);
        boxes.insert(
            1,
            BoundingBox::from_rect("outside", 900.0, 900.0, 30.0, 10.0, 0.7, "#E6194B"),
        );

        let words = WordRecognizer::default()
            .recognize_all(Arc::new(document_image()), &boxes, &model, RECOGNITION_INPUT_SIZE)
            .await
            .unwrap();

        assert_eq!(words.len(), 3);
        assert_eq!(words[0].value, "Total");
        assert_eq!(words[1].id, "outside");
        assert!(words[1].value.is_empty());
        assert_eq!(words[2].value, "Total");
    }

    /// Test 9: Crops are split into batches without losing order
    #[tokio::test]
    async fn test_recognition_batches() {
        let loader = FakeLoader::new();
        loader.with_graph("crnn_vgg16_bn", TextGraph::new(&["a", "b", "c", "d"]));
        let model = recognition_model(loader).await;

        let boxes = boxes(10);
        let recognizer = WordRecognizer::new(Arc::new(Default::default()), 4);
        let words = recognizer
            .recognize_all(Arc::new(document_image()), &boxes, &model, RECOGNITION_INPUT_SIZE)
            .await
            .unwrap();

        // Each batch restarts the word cycle: 4 + 4 + 2
        let values: String = words.iter().map(|w| w.value.as_str()).collect();
        assert_eq!(values, "abcdabcdab");
    }

    /// Test 10: A failing forward pass fails the whole run
    #[tokio::test]
    async fn test_inference_failure_is_run_level() {
        let loader = FakeLoader::new();
        loader.with_graph("crnn_vgg16_bn", FailingGraph);
        let model = recognition_model(loader).await;

        let err = WordRecognizer::default()
            .recognize_all(Arc::new(document_image()), &boxes(2), &model, RECOGNITION_INPUT_SIZE)
            .await
            .unwrap_err();
        assert!(err.is_inference());
    }
}
