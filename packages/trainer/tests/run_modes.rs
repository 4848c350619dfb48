//! Train then test against CSV files on disk

use std::fmt::Write as _;
use std::path::Path;

use dkvmn_trainer::{run, AppError, Config, Dataset, Mode};

fn write_split(path: &Path, learners: u32) {
    let mut text = String::new();
    for learner in 0..learners {
        let len = 4 + learner % 7;
        let questions: Vec<String> = (0..len).map(|t| ((learner * 3 + t) % 6 + 1).to_string()).collect();
        // easy questions (ids 1..=3) are answered correctly
        let answers: Vec<String> = (0..len)
            .map(|t| (((learner * 3 + t) % 6 + 1) <= 3 || (learner + t) % 5 == 0) as u8)
            .map(|a| a.to_string())
            .collect();
        let _ = write!(text, "{len}\n{},\n{},\n", questions.join(","), answers.join(","));
    }
    std::fs::write(path, text).unwrap();
}

fn config(root: &Path) -> Config {
    let data_dir = root.join("data");
    std::fs::create_dir_all(&data_dir).unwrap();
    write_split(&data_dir.join("toy_train1.csv"), 24);
    write_split(&data_dir.join("toy_valid1.csv"), 10);
    write_split(&data_dir.join("toy_test.csv"), 10);

    let mut config = Config::preset(Dataset::Synthetic);
    config.model.n_question = 6;
    config.model.seqlen = 8;
    config.model.q_embed_dim = 4;
    config.model.qa_embed_dim = 6;
    config.model.memory_size = 3;
    config.model.final_fc_dim = 5;
    config.train.batch_size = 4;
    config.train.max_epochs = 3;
    config.data_dir = data_dir;
    config.data_name = "toy".into();
    config.save = "toy/v1".into();
    config.load = "toy/v1".into();
    config.model_root = root.join("model");
    config.result_root = root.join("result");
    config
}

#[test]
fn test_train_then_test_writes_results() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());

    let summary = run(&config).unwrap();
    assert!(summary.best_epoch.is_some());
    let test = summary.test.unwrap();
    assert!(test.auc.is_some());

    let log = std::fs::read_to_string(config.result_dir().join(&summary.run_name)).unwrap();
    assert!(log.contains("valid_auc:"));
    assert!(log.contains("test_auc:"));
    assert!(config
        .save_model_dir()
        .join(format!("{}.safetensors", summary.run_name))
        .is_file());

    // A separate test run reloads the same parameters and reproduces the metrics
    let mut test_only = config.clone();
    test_only.mode = Mode::Test;
    let again = run(&test_only).unwrap();
    assert_eq!(again.test.unwrap().auc, test.auc);
}

#[test]
fn test_mode_without_checkpoint_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.mode = Mode::Test;
    assert!(matches!(run(&config), Err(AppError::MissingCheckpoint(_))));
}

#[test]
fn test_missing_data_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.data_name = "absent".into();
    assert!(matches!(run(&config), Err(AppError::Algo(_))));
}
