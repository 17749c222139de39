use std::cell::Cell;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::VarMap;
use seqtag_core::{
    BatchLoader, BertCnn, EncodedExample, SeqTagError, SequenceTagger, TrainConfig,
};
use seqtag_trainer::{Trainer, run_epochs};

const LABELS: [&str; 5] = ["O", "B-PER", "I-PER", "B-LOC", "I-LOC"];

fn config(save_path: &std::path::Path) -> TrainConfig {
    let json = serde_json::json!({
        "dataset": "toy",
        "save_path": save_path,
        "learning_rate": 1e-2,
        "batch_size": 2,
        "epochs": 2,
        "label_num": LABELS.len(),
        "labels": LABELS,
        "encoder": {"kind": "embedding", "hidden_size": 16},
        "head": {"conv_channels": 16, "kernel_size": 3, "dropout": 0.0}
    });
    TrainConfig::from_json(&json.to_string()).unwrap()
}

/// Two examples of lengths 3 and 5 with the given label ids.
fn toy_loader(labels: [&[u32]; 2]) -> BatchLoader {
    let examples = vec![
        EncodedExample::new(vec![2, 3, 4], labels[0].to_vec()),
        EncodedExample::new(vec![5, 6, 7, 8, 9], labels[1].to_vec()),
    ];
    BatchLoader::new(examples, 2, Device::Cpu)
}

fn entity_loader() -> BatchLoader {
    toy_loader([&[1, 2, 0], &[0, 0, 3, 4, 0]])
}

/// Always scores "O" highest and has nothing to train.
struct AlwaysOutside {
    varmap: VarMap,
    num_labels: usize,
}

impl AlwaysOutside {
    fn new() -> Self {
        Self {
            varmap: VarMap::new(),
            num_labels: LABELS.len(),
        }
    }
}

impl SequenceTagger for AlwaysOutside {
    fn name(&self) -> &str {
        "always_outside"
    }

    fn forward_t(&self, input_ids: &Tensor, _train: bool) -> candle_core::Result<Tensor> {
        let (batch, len) = input_ids.dims2()?;
        let mut scores = vec![0f32; batch * len * self.num_labels];
        for position in 0..batch * len {
            scores[position * self.num_labels] = 1.0;
        }
        Tensor::from_vec(scores, (batch, len, self.num_labels), input_ids.device())
    }

    fn varmap(&self) -> &VarMap {
        &self.varmap
    }
}

#[test]
fn always_outside_scores_zero_when_every_example_has_an_entity() {
    let dir = tempfile::tempdir().unwrap();
    let trainer = Trainer::new(AlwaysOutside::new(), &config(dir.path())).unwrap();

    let report = trainer.eval(0, &entity_loader()).unwrap();
    assert_eq!(report.f1, 0.0);
    assert_eq!(report.recall, 0.0);
}

#[test]
fn precision_column_reports_token_accuracy() {
    let dir = tempfile::tempdir().unwrap();
    let trainer = Trainer::new(AlwaysOutside::new(), &config(dir.path())).unwrap();

    // Half of the real tokens are "O", so the tagger is half right token by
    // token while finding no entity at all.
    let report = trainer.eval(0, &entity_loader()).unwrap();
    assert_eq!(report.precision, 0.5);
    assert_eq!(report.scores.accuracy, 0.5);
    assert_eq!(report.scores.overall.precision, 0.0);

    let table = report.table("Dev 0").to_string();
    let row = table
        .lines()
        .find(|line| line.contains("Metrics"))
        .unwrap();
    let cells: Vec<&str> = row
        .split('|')
        .map(str::trim)
        .filter(|cell| !cell.is_empty())
        .collect();
    assert_eq!(cells, ["Metrics", "0.0000", "0.5000", "0.0000"]);
    assert!(table.contains("Precision"));
}

#[test]
fn eval_of_an_empty_loader_fails() {
    let dir = tempfile::tempdir().unwrap();
    let trainer = Trainer::new(AlwaysOutside::new(), &config(dir.path())).unwrap();

    let empty = BatchLoader::new(Vec::new(), 2, Device::Cpu);
    assert!(matches!(
        trainer.eval(0, &empty),
        Err(SeqTagError::NothingToScore)
    ));
}

#[test]
fn always_outside_scores_one_when_gold_is_all_outside() {
    let dir = tempfile::tempdir().unwrap();
    let trainer = Trainer::new(AlwaysOutside::new(), &config(dir.path())).unwrap();

    let loader = toy_loader([&[0, 0, 0], &[0, 0, 0, 0, 0]]);
    let report = trainer.eval(0, &loader).unwrap();
    assert_eq!(report.f1, 1.0);
    assert_eq!(report.precision, 1.0);
    assert_eq!(report.recall, 1.0);
    assert_eq!(report.scores.overall.precision, 1.0);
}

#[test]
fn eval_strips_padding_before_scoring() {
    let dir = tempfile::tempdir().unwrap();
    let trainer = Trainer::new(AlwaysOutside::new(), &config(dir.path())).unwrap();

    // 4 of 8 real tokens are "O". The 2 pad positions of the short row must
    // not count as correct.
    let report = trainer.eval(0, &entity_loader()).unwrap();
    assert_eq!(report.scores.accuracy, 4.0 / 8.0);
}

#[test]
fn mismatched_label_space_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut model = AlwaysOutside::new();
    model.num_labels = 3;
    let trainer = Trainer::new(model, &config(dir.path())).unwrap();

    assert!(matches!(
        trainer.eval(0, &entity_loader()),
        Err(SeqTagError::Shape(_))
    ));
}

#[test]
fn eval_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let model = BertCnn::new(&config, 16, &Device::Cpu).unwrap();
    let trainer = Trainer::new(model, &config).unwrap();

    let loader = entity_loader();
    let first = trainer.eval(0, &loader).unwrap();
    let second = trainer.eval(0, &loader).unwrap();
    assert_eq!(first, second);
}

#[test]
fn training_lowers_the_loss() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let model = BertCnn::new(&config, 16, &Device::Cpu).unwrap();
    let mut trainer = Trainer::new(model, &config).unwrap();

    let loader = entity_loader();
    let first = trainer.train(0, &loader).unwrap();
    let mut last = first.mean_loss;
    for epoch in 1..40 {
        last = trainer.train(epoch, &loader).unwrap().mean_loss;
    }

    assert!(first.mean_loss.is_finite());
    assert!(last < first.mean_loss, "loss went from {} to {last}", first.mean_loss);
    // Label sequences are gathered for every example, without padding.
    assert_eq!(first.sequences.len(), 2);
    assert_eq!(first.sequences.gold[0], vec!["B-PER", "I-PER", "O"]);
    assert_eq!(first.sequences.pred[1].len(), 5);
}

#[test]
fn save_then_load_restores_identical_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let input = Tensor::new(&[[2u32, 3, 4, 0, 0], [5, 6, 7, 8, 9]], &Device::Cpu).unwrap();

    let mut trained = Trainer::new(BertCnn::new(&config, 16, &Device::Cpu).unwrap(), &config).unwrap();
    trained.train(0, &entity_loader()).unwrap();
    trained.save().unwrap();
    assert!(trained.checkpoint_path().ends_with("toy/bert_cnn.safetensors"));
    let expected = trained
        .model()
        .forward_t(&input, false)
        .unwrap()
        .to_vec3::<f32>()
        .unwrap();

    let mut fresh = Trainer::new(BertCnn::new(&config, 16, &Device::Cpu).unwrap(), &config).unwrap();
    let before = fresh.model().forward_t(&input, false).unwrap().to_vec3::<f32>().unwrap();
    assert_ne!(before, expected);

    fresh.load(None).unwrap();
    let restored = fresh.model().forward_t(&input, false).unwrap().to_vec3::<f32>().unwrap();
    assert_eq!(restored, expected);
}

#[test]
fn load_from_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let trainer = Trainer::new(BertCnn::new(&config, 16, &Device::Cpu).unwrap(), &config).unwrap();
    trainer.save().unwrap();

    let other_dir = tempfile::tempdir().unwrap();
    let other_config = self::config(other_dir.path());
    let mut other = Trainer::new(BertCnn::new(&other_config, 16, &Device::Cpu).unwrap(), &other_config).unwrap();
    other.load(Some(trainer.checkpoint_path())).unwrap();
}

#[test]
fn load_without_checkpoint_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let mut trainer = Trainer::new(BertCnn::new(&config, 16, &Device::Cpu).unwrap(), &config).unwrap();

    assert!(matches!(
        trainer.load(None),
        Err(SeqTagError::CheckpointNotFound(_))
    ));
}

/// Predicted label rows for the two `entity_loader` examples. Gold holds
/// PER(0..=1) in the first row and LOC(2..=3) in the second.
type Stage = [&'static [u32]; 2];

/// One of two entities found, one spurious: F1 0.5.
const HALF: Stage = [&[1, 2, 0], &[0, 0, 0, 0, 3]];
/// One of two found, two spurious: F1 0.4.
const LOW: Stage = [&[1, 2, 3], &[0, 0, 0, 0, 3]];
/// Both found, one spurious: F1 0.8.
const HIGH: Stage = [&[1, 2, 0], &[3, 0, 3, 4, 0]];

/// Plays back a fixed prediction per epoch. Each training pass moves the
/// `stage` parameter to the next entry of `script`, so a checkpoint
/// records which epoch's predictions it holds.
struct Scripted {
    varmap: VarMap,
    stage: Var,
    script: Vec<Stage>,
    epoch: Cell<usize>,
}

impl Scripted {
    fn new(script: Vec<Stage>) -> Self {
        let varmap = VarMap::new();
        let stage = Var::zeros(1, DType::F32, &Device::Cpu).unwrap();
        varmap
            .data()
            .lock()
            .unwrap()
            .insert("stage".to_string(), stage.clone());
        Self {
            varmap,
            stage,
            script,
            epoch: Cell::new(0),
        }
    }

    fn stage(&self) -> usize {
        self.stage.as_tensor().to_vec1::<f32>().unwrap()[0] as usize
    }
}

impl SequenceTagger for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn forward_t(&self, input_ids: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        if train {
            let epoch = self.epoch.get();
            self.stage.set(&Tensor::new(&[epoch as f32], input_ids.device())?)?;
            self.epoch.set(epoch + 1);
        }

        let (batch, len) = input_ids.dims2()?;
        let rows = self.script[self.stage()];
        let mut scores = vec![0f32; batch * len * LABELS.len()];
        for (row, labels) in rows.iter().enumerate().take(batch) {
            for (position, &label) in labels.iter().enumerate() {
                scores[(row * len + position) * LABELS.len() + label as usize] = 1.0;
            }
        }
        Tensor::from_vec(scores, (batch, len, LABELS.len()), input_ids.device())
    }

    fn varmap(&self) -> &VarMap {
        &self.varmap
    }
}

fn run_script(script: Vec<Stage>) -> (Trainer<Scripted>, seqtag_trainer::RunSummary, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let epochs = script.len();
    let mut trainer = Trainer::new(Scripted::new(script), &config(dir.path())).unwrap();
    let loader = entity_loader();
    let summary = run_epochs(&mut trainer, epochs, &loader, &loader).unwrap();
    (trainer, summary, dir)
}

fn checkpoint_stage(trainer: &Trainer<Scripted>) -> usize {
    let tensors = candle_core::safetensors::load(trainer.checkpoint_path(), &Device::Cpu).unwrap();
    tensors["stage"].to_vec1::<f32>().unwrap()[0] as usize
}

#[test]
fn scripted_stages_score_as_expected() {
    let dir = tempfile::tempdir().unwrap();
    let loader = entity_loader();
    let mut trainer = Trainer::new(Scripted::new(vec![HALF, LOW, HIGH]), &config(dir.path())).unwrap();

    let mut scores = Vec::new();
    for epoch in 0..3 {
        trainer.train(epoch, &loader).unwrap();
        scores.push(trainer.eval(epoch, &loader).unwrap().f1);
    }
    assert_eq!(scores[0], 0.5);
    assert!((scores[1] - 0.4).abs() < 1e-12);
    assert!((scores[2] - 0.8).abs() < 1e-12);
}

#[test]
fn epoch_loop_saves_only_on_strict_improvement() {
    // 0.5, 0.4, 0.8, 0.5: saves after epochs 0 and 2 only.
    let (trainer, summary, _dir) = run_script(vec![HALF, LOW, HIGH, HALF]);

    assert_eq!(summary.best_epoch, Some(2));
    assert!((summary.best_f1 - 0.8).abs() < 1e-12);
    assert_eq!(summary.checkpoint.as_deref(), Some(trainer.checkpoint_path()));
    assert_eq!(checkpoint_stage(&trainer), 2);

    // The last epoch scored 0.5; the final pass runs on the restored best.
    assert_eq!(trainer.model().stage(), 2);
    assert_eq!(summary.final_report.f1, summary.best_f1);
}

#[test]
fn epoch_loop_ignores_a_worse_epoch() {
    let (trainer, summary, _dir) = run_script(vec![HALF, LOW]);

    assert_eq!(summary.best_epoch, Some(0));
    assert_eq!(summary.best_f1, 0.5);
    assert_eq!(checkpoint_stage(&trainer), 0);
    assert_eq!(summary.final_report.f1, 0.5);
}

#[test]
fn epoch_loop_ignores_a_tie() {
    let (trainer, summary, _dir) = run_script(vec![HALF, HALF]);

    assert_eq!(summary.best_epoch, Some(0));
    assert_eq!(checkpoint_stage(&trainer), 0);
    assert_eq!(trainer.model().stage(), 0);
}

#[test]
fn epoch_loop_without_improvement_writes_no_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let mut trainer = Trainer::new(AlwaysOutside::new(), &config(dir.path())).unwrap();

    let loader = entity_loader();
    // Evaluation only: zero epochs never beat the initial best of 0.0.
    let summary = run_epochs(&mut trainer, 0, &loader, &loader).unwrap();
    assert_eq!(summary.best_epoch, None);
    assert_eq!(summary.checkpoint, None);
    assert_eq!(summary.final_report.f1, 0.0);
}
