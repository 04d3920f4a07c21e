use lincrf::{read_conll, Model, TemplateSet, Token, Trainer};

const CORPUS: &str = "\
He PRP B-NP
reckons VBZ B-VP
the DT B-NP
current JJ I-NP
account NN I-NP
deficit NN I-NP
will MD B-VP
narrow VB I-VP

Only RB B-NP
1.8 CD I-NP
billion CD I-NP
in IN B-PP
September NNP B-NP

The DT B-NP
deficit NN I-NP
will MD B-VP
widen VB I-VP
";

const TEMPLATES: &str = "\
U00:%x[-1,0]
U01:%x[0,0]
U02:%x[1,0]
U10:%x[-1,1]
U11:%x[0,1]
U12:%x[1,1]
U13:%x[-1,1]/%x[0,1]
B
";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("CRF Training and Tagging Example");
    println!("=================================\n");

    let instances = read_conll(CORPUS.as_bytes(), true)?;
    let templates = TemplateSet::parse(TEMPLATES)?;
    println!("Training data:");
    println!("  Sentences: {}", instances.len());
    println!("  Templates: {}\n", templates.len());

    let mut trainer = Trainer::new(templates)
        .with_sigma(2.0)?
        .with_max_iterations(100)?
        .with_seed(42);
    for inst in instances {
        trainer.append(inst)?;
    }

    println!("Training model...");
    let model = trainer.train()?;
    println!("  Features: {}", model.num_features());
    println!("  Tags: {}\n", model.num_tags());

    let model_path = std::env::temp_dir().join("example_model.lcrf");
    model.save(&model_path)?;
    println!("Saved model to {}", model_path.display());

    let model = Model::load(&model_path)?;
    let mut tagger = model.tagger();

    let tokens = vec![
        Token::with_columns(["The", "DT"]),
        Token::with_columns(["account", "NN"]),
        Token::with_columns(["will", "MD"]),
        Token::with_columns(["narrow", "VB"]),
    ];
    let result = tagger.tag(&tokens)?;
    println!("\nInput: The account will narrow");
    println!("Predicted tags: {:?}", result);

    Ok(())
}
