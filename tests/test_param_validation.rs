use lincrf::train::{LbfgsParams, LogLikelihood};
use lincrf::{
    FeatureIndex, Instance, LineSearchAlgorithm, TagSet, TemplateSet, Trainer, TrainerParams,
    Vocabulary,
};

#[test]
fn test_sigma_validation() {
    let mut params = TrainerParams::default();

    // sigma must be positive
    let result = params.set_sigma(0.0);
    assert!(result.is_err());
    assert_eq!(result.unwrap_err().to_string(), "sigma must be positive");
    assert!(params.set_sigma(-1.0).is_err());
    assert!(params.set_sigma(f64::NAN).is_err());

    assert!(params.set_sigma(0.5).is_ok());
    assert_eq!(params.sigma(), 0.5);

    let result = Trainer::default().with_sigma(-2.0);
    assert!(result.is_err());
}

#[test]
fn test_sigma_validated_before_optimization() {
    let corpus = vec![Instance::tagged(&[("a", "X")])];
    let vocab = Vocabulary::build(["a"]);
    let tags = TagSet::build(["X"]).unwrap();
    let mut index = FeatureIndex::new();
    let batch = index
        .build_training(&corpus, &TemplateSet::default(), &vocab, &tags)
        .unwrap();
    let err = LogLikelihood::new(&index, &batch, &tags, 0.0).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    assert_eq!(err.to_string(), "sigma must be positive");
}

#[test]
fn test_init_scale_validation() {
    let mut params = TrainerParams::default();
    let result = params.set_init_scale(-0.1);
    assert!(result.is_err());
    assert_eq!(
        result.unwrap_err().to_string(),
        "init_scale must be non-negative"
    );
    assert!(params.set_init_scale(0.0).is_ok());
}

#[test]
fn test_max_iterations_validation() {
    let mut params = LbfgsParams::default();
    let result = params.set_max_iterations(0);
    assert!(result.is_err());
    assert_eq!(
        result.unwrap_err().to_string(),
        "max_iterations must be at least 1"
    );
    assert!(params.set_max_iterations(1).is_ok());

    assert!(Trainer::default().with_max_iterations(0).is_err());
}

#[test]
fn test_epsilon_validation() {
    let mut params = LbfgsParams::default();
    assert!(params.set_epsilon(0.0).is_ok());

    let result = params.set_epsilon(-0.001);
    assert!(result.is_err());
    assert_eq!(
        result.unwrap_err().to_string(),
        "epsilon must be non-negative"
    );

    assert!(Trainer::default().with_epsilon(-1.0).is_err());
}

#[test]
fn test_delta_and_linesearch_validation() {
    let mut params = LbfgsParams::default();
    assert!(params.set_delta(-1e-3).is_err());
    assert!(params.set_delta(0.0).is_ok());

    let result = params.set_max_linesearch(0);
    assert_eq!(
        result.unwrap_err().to_string(),
        "max_linesearch must be positive"
    );

    params.set_linesearch(LineSearchAlgorithm::BacktrackingArmijo);
    assert_eq!(params.linesearch(), LineSearchAlgorithm::BacktrackingArmijo);
}

#[test]
fn test_training_input_validation() {
    let mut trainer = Trainer::default();

    // Should fail without training data
    let err = trainer.train().unwrap_err();
    assert_eq!(err.to_string(), "no training data");

    let err = trainer.append(Instance::default()).unwrap_err();
    assert_eq!(err.to_string(), "empty sequences are not allowed");

    let mut partial = Instance::tagged(&[("a", "X")]);
    partial.push("b".into(), None);
    let err = trainer.append(partial).unwrap_err();
    assert_eq!(err.to_string(), "training instance has an untagged token");
}

#[test]
fn test_template_validation() {
    assert!(TemplateSet::parse("").is_err());
    assert!(TemplateSet::parse("Q00:%x[0,0]").is_err());
    assert!(TemplateSet::new(["U00:%x[0,0]", "B"]).is_ok());
}
