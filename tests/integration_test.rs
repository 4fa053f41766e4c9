//! End-to-end scoring and issue detection on a small synthetic dataset.

use gt_rank::{
    find_label_issues, find_label_issues_by_method, get_label_quality_scores, issues_from_scores,
    Annotation, FindIssuesOptions, LabelIssues, Prediction, ScoringOptions,
};

const P0: [f64; 4] = [10.0, 10.0, 60.0, 60.0];
const P1: [f64; 4] = [200.0, 10.0, 250.0, 60.0];
const P2: [f64; 4] = [10.0, 200.0, 60.0, 250.0];
const P3: [f64; 4] = [200.0, 200.0, 250.0, 250.0];

fn scored(b: [f64; 4], prob: f64) -> [f64; 5] {
    [b[0], b[1], b[2], b[3], prob]
}

fn shifted(b: [f64; 4], offset: f64) -> [f64; 4] {
    [b[0] + offset, b[1] + offset, b[2] + offset, b[3] + offset]
}

/// Five perfectly annotated images followed by five corrupted ones.
fn dataset() -> (Vec<Annotation>, Vec<Prediction>) {
    let mut annotations = Vec::new();
    let mut predictions = Vec::new();

    for i in 0..5 {
        let prob = 0.955 + 0.01 * (i % 4) as f64;
        annotations.push(Annotation::new(vec![P0, P1, P2], vec![0, 1, 2]));
        predictions.push(Prediction::PerClass(vec![
            vec![scored(P0, prob)],
            vec![scored(P1, 0.97)],
            vec![scored(P2, 0.98)],
        ]));
    }

    let model_output = || {
        Prediction::PerClass(vec![
            vec![scored(P0, 0.97)],
            vec![scored(P1, 0.97)],
            vec![scored(P2, 0.98)],
        ])
    };

    // Missing box: the person at P3 was never annotated
    annotations.push(Annotation::new(vec![P0, P1], vec![0, 1]));
    predictions.push(Prediction::PerClass(vec![
        vec![scored(P0, 0.97)],
        vec![scored(P1, 0.97)],
        vec![scored(P3, 0.98)],
    ]));

    // Shifted box
    annotations.push(Annotation::new(vec![shifted(P0, 30.0), P1, P2], vec![0, 1, 2]));
    predictions.push(model_output());

    // Swapped class
    annotations.push(Annotation::new(vec![P0, P1, P2], vec![0, 2, 2]));
    predictions.push(model_output());

    // Swapped class, fewer boxes
    annotations.push(Annotation::new(vec![P0, P2], vec![1, 2]));
    predictions.push(Prediction::PerClass(vec![
        vec![scored(P0, 0.97)],
        vec![],
        vec![scored(P2, 0.98)],
    ]));

    // Missing box
    annotations.push(Annotation::new(vec![P0], vec![0]));
    predictions.push(Prediction::PerClass(vec![
        vec![scored(P0, 0.97)],
        vec![scored(P3, 0.99)],
        vec![],
    ]));

    (annotations, predictions)
}

#[test]
fn test_scores_separate_perfect_from_corrupted() {
    let (annotations, predictions) = dataset();
    let scores =
        get_label_quality_scores(&annotations, &predictions, &ScoringOptions::default()).unwrap();

    assert_eq!(scores.len(), 10);
    assert!(scores.iter().all(|s| (0.0..=1.0 + 1e-12).contains(s)));

    let worst_perfect = scores[..5].iter().copied().fold(f64::INFINITY, f64::min);
    assert!(worst_perfect > 0.9, "perfect images scored {:?}", &scores[..5]);
    for (i, s) in scores[5..].iter().enumerate() {
        assert!(*s < worst_perfect, "corrupted image {} scored {}", i + 5, s);
    }
    // Shifted and swapped boxes are penalized hardest
    assert!(scores[6] < 0.7);
    assert!(scores[7] < 0.7);
    assert!(scores[8] < 0.7);
}

#[test]
fn test_ranking_puts_corrupted_first() {
    let (annotations, predictions) = dataset();
    let scores =
        get_label_quality_scores(&annotations, &predictions, &ScoringOptions::default()).unwrap();
    let ranking = issues_from_scores(&scores, 1.0).unwrap();

    assert_eq!(ranking.len(), 10);
    let mut worst_five = ranking[..5].to_vec();
    worst_five.sort_unstable();
    assert_eq!(worst_five, vec![5, 6, 7, 8, 9]);

    let argmin = (0..scores.len())
        .min_by(|&a, &b| scores[a].total_cmp(&scores[b]))
        .unwrap();
    assert_eq!(ranking[0], argmin);
}

#[test]
fn test_find_label_issues_flags_only_corrupted() {
    let (annotations, predictions) = dataset();
    let issues =
        find_label_issues(&annotations, &predictions, &FindIssuesOptions::default()).unwrap();

    let expected: Vec<bool> = (0..10).map(|i| i >= 5).collect();
    assert_eq!(issues, LabelIssues::Mask(expected));
}

#[test]
fn test_find_label_issues_ranked() {
    let (annotations, predictions) = dataset();
    let options = FindIssuesOptions {
        return_indices_ranked_by_score: true,
        ..Default::default()
    };
    let scores =
        get_label_quality_scores(&annotations, &predictions, &ScoringOptions::default()).unwrap();

    match find_label_issues(&annotations, &predictions, &options).unwrap() {
        LabelIssues::RankedIndices(indices) => {
            assert_eq!(indices.len(), 5);
            assert!(indices.iter().all(|&i| i >= 5));
            assert!(indices.windows(2).all(|w| scores[w[0]] <= scores[w[1]]));
        }
        other => panic!("expected ranked indices, got {:?}", other),
    }
}

#[test]
fn test_method_dispatch() {
    let (annotations, predictions) = dataset();
    let options = FindIssuesOptions::default();

    let flags =
        find_label_issues_by_method(&annotations, &predictions, "subtype", &options).unwrap();
    assert_eq!(flags, vec![0, 0, 0, 0, 0, 1, 1, 1, 1, 1]);

    let sentinel =
        find_label_issues_by_method(&annotations, &predictions, "not_a_method", &options).unwrap();
    assert_eq!(sentinel, vec![-1; 10]);
}

#[test]
fn test_flat_predictions_match_class_nested() {
    let (annotations, predictions) = dataset();
    let flat: Vec<Prediction> = predictions
        .iter()
        .map(|p| match p {
            Prediction::PerClass(classes) => {
                let mut boxes = Vec::new();
                let mut labels = Vec::new();
                let mut pred_probs = Vec::new();
                for (k, class_boxes) in classes.iter().enumerate() {
                    for b in class_boxes {
                        boxes.push([b[0], b[1], b[2], b[3]]);
                        labels.push(k);
                        let mut probs = vec![(1.0 - b[4]) / 2.0; 3];
                        probs[k] = b[4];
                        pred_probs.push(probs);
                    }
                }
                Prediction::AllPred {
                    boxes,
                    labels,
                    pred_probs,
                }
            }
            other => other.clone(),
        })
        .collect();

    let options = ScoringOptions::default();
    let nested_scores = get_label_quality_scores(&annotations, &predictions, &options).unwrap();
    let flat_scores = get_label_quality_scores(&annotations, &flat, &options).unwrap();
    for (a, b) in nested_scores.iter().zip(&flat_scores) {
        assert!((a - b).abs() < 1e-12);
    }
}

#[test]
fn test_pruning_threshold_changes_scores() {
    use gt_rank::compute_label_quality_scores;

    let (annotations, predictions) = dataset();
    let options = ScoringOptions::default();

    let unpruned = compute_label_quality_scores(&annotations, &predictions, &options, None).unwrap();
    let kept_all =
        compute_label_quality_scores(&annotations, &predictions, &options, Some(0.0)).unwrap();
    assert_eq!(unpruned, kept_all);

    // With nothing predicted no box is confidently overlooked or swapped
    let emptied =
        compute_label_quality_scores(&annotations, &predictions, &options, Some(1.0)).unwrap();
    assert_eq!(emptied.len(), 10);
    for s in &emptied {
        assert_eq!(s.overlooked, 1.0);
        assert!((s.badloc - 1.0).abs() < 1e-12);
        assert!((s.swap - 1.0).abs() < 1e-12);
    }
}
