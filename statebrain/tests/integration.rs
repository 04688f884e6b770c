//! Integration tests for statebrain through its public API

use statebrain::prelude::*;
use statebrain::{BlockReport, DEFAULT_MASS_THRESHOLD, deserialize_block};

fn encode(text: &str, alphabet: usize) -> Vec<Vec<f64>> {
    text.bytes().map(|b| one_hot(b as usize, alphabet)).collect()
}

#[test]
fn test_byte_level_sequence_scoring() {
    let block = Block::with_config(&BlockConfig::byte_level(8).with_seed(1)).unwrap();
    let text = "hello world";
    let inputs = encode(text, 256);
    let targets: Vec<usize> = text.bytes().skip(1).map(usize::from).chain([0]).collect();

    let run = run_sequence(&block, &inputs).unwrap();
    assert_eq!(run.len(), text.len());
    let (loss, grads) = negative_log_likelihood(&run.outputs(), &targets).unwrap();
    assert!(loss.is_finite() && loss > 0.0);

    let mut grad = Gradient::new();
    run.propagate(&grads, None, &mut grad).unwrap();
    assert!(grad.contains(block.start().id));
    for (_, values) in grad.iter() {
        assert!(values.iter().all(|v| v.is_finite()));
    }
}

#[test]
fn test_batch_of_sequences_in_lockstep() {
    let block = Block::with_config(&BlockConfig::new(4, 3).with_seed(2)).unwrap();
    let sequences = [[0usize, 1, 2], [3, 3, 0], [2, 1, 1]];

    let mut states: Vec<StateDist> = sequences
        .iter()
        .map(|_| block.initial_state().distribution())
        .collect();
    for t in 0..3 {
        let items: Vec<_> = sequences
            .iter()
            .zip(&states)
            .map(|(seq, state)| BatchItem::new(one_hot(seq[t], 4), state.clone()))
            .collect();
        states = block.apply_batch(&items).unwrap().next_states();
    }

    for (seq, state) in sequences.iter().zip(&states) {
        let inputs: Vec<_> = seq.iter().map(|&s| one_hot(s, 4)).collect();
        let run = run_sequence(&block, &inputs).unwrap();
        assert_eq!(&run.final_state(), state);
    }
}

#[test]
fn test_save_load_analyze() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("block.json");

    let block = Block::with_config(&BlockConfig::new(16, 4).with_seed(3)).unwrap();
    block.save(&path).unwrap();
    let loaded = Block::load(&path).unwrap();

    let report = BlockReport::from_block(&loaded, DEFAULT_MASS_THRESHOLD);
    let text = report.to_string();
    assert!(text.starts_with("Start states: 0 (0x0) (p=1.0000)"));
    assert_eq!(text.lines().count(), 1 + 4);

    let bytes = std::fs::read(&path).unwrap();
    let again = deserialize_block(&bytes).unwrap();
    assert_eq!(again.entries().len(), 4);
}

#[test]
fn test_error_surface() {
    assert!(matches!(
        Block::new(0, 1),
        Err(StatebrainError::InvalidConfig(_))
    ));
    let block = Block::new(3, 2).unwrap();
    let err = block
        .step(&[1.0], &block.initial_state().distribution())
        .unwrap_err();
    assert!(err.to_string().contains("input scores"));
    assert!(deserialize_block(b"{}").is_err());
}

#[test]
fn test_trait_object_runner() {
    let block = Block::with_config(&BlockConfig::new(3, 2).with_seed(4)).unwrap();
    let runner: &dyn RecurrentBlock = &block;
    let start = runner.initial_state();
    let step = runner.apply(&one_hot(1, 3), &start.distribution()).unwrap();
    assert_eq!(step.output().len(), runner.output_size());
    assert_eq!(step.next_state().len(), runner.state_size());
}

#[test]
fn test_readme_usage() {
    let block = Block::with_config(&BlockConfig::new(4, 3).with_seed(7)).unwrap();
    let inputs: Vec<_> = [2, 0, 3].iter().map(|&s| one_hot(s, 4)).collect();
    let run = run_sequence(&block, &inputs).unwrap();

    let (loss, grads) = negative_log_likelihood(&run.outputs(), &[0, 3, 1]).unwrap();
    assert!(loss > 0.0);
    let mut grad = Gradient::new();
    run.propagate(&grads, None, &mut grad).unwrap();
    assert!(!grad.is_empty());

    let mut rv = RVector::new();
    for param in block.parameters() {
        rv.insert(param, vec![1.0; param.len()]);
    }
    let mut hv = RGradient::new();
    run_sequence_r(&block, &rv, &inputs)
        .unwrap()
        .propagate_r(&grads, None, &mut hv, None)
        .unwrap();
    assert!(hv.iter().all(|(_, v)| v.iter().all(|x| x.is_finite())));
    assert!(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("README.md").exists());
}
