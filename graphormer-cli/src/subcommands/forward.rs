use std::fs::File;
use std::io::BufReader;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use graphormer_transformers::models::graphormer::{
    GraphEncoderLayerBuilder, GraphEncoderLayerConfig,
};
use tch::nn::VarStore;
use tch::{self, Device, Kind, Tensor};

use crate::traits::GraphormerApp;

const ATTN_BIAS: &str = "ATTN_BIAS";
const BATCH_SIZE: &str = "BATCH_SIZE";
const CONFIG: &str = "CONFIG";
const GPU: &str = "GPU";
const SEED: &str = "SEED";
const SEQ_LEN: &str = "SEQ_LEN";
const TRAIN: &str = "TRAIN";

pub struct ForwardApp {
    attn_bias: bool,
    batch_size: i64,
    config: String,
    device: Device,
    seed: i64,
    seq_len: i64,
    train: bool,
}

impl ForwardApp {
    fn load_config(&self) -> Result<GraphEncoderLayerConfig> {
        let f = File::open(&self.config)
            .context(format!("Cannot open configuration file: {}", self.config))?;
        serde_json::from_reader(BufReader::new(f))
            .context(format!("Cannot parse configuration file: {}", self.config))
    }
}

impl GraphormerApp for ForwardApp {
    fn app() -> Command {
        Command::new("forward")
            .arg_required_else_help(true)
            .about("Apply an encoder layer to random input")
            .arg(
                Arg::new(CONFIG)
                    .help("Encoder layer configuration file (JSON)")
                    .index(1)
                    .required(true),
            )
            .arg(
                Arg::new(ATTN_BIAS)
                    .long("attn-bias")
                    .action(ArgAction::SetTrue)
                    .help("Add a random attention bias"),
            )
            .arg(
                Arg::new(BATCH_SIZE)
                    .long("batch-size")
                    .value_name("N")
                    .help("Batch size")
                    .default_value("4"),
            )
            .arg(
                Arg::new(GPU)
                    .long("gpu")
                    .num_args(1)
                    .help("Use the GPU with the given identifier"),
            )
            .arg(
                Arg::new(SEED)
                    .long("seed")
                    .value_name("N")
                    .help("Seed for parameter initialization and input sampling")
                    .default_value("42"),
            )
            .arg(
                Arg::new(SEQ_LEN)
                    .long("seq-len")
                    .value_name("N")
                    .help("Sequence length")
                    .default_value("16"),
            )
            .arg(
                Arg::new(TRAIN)
                    .long("train")
                    .action(ArgAction::SetTrue)
                    .help("Apply the layer in training mode"),
            )
    }

    fn parse(matches: &ArgMatches) -> Result<Self> {
        let config = matches.get_one::<String>(CONFIG).unwrap().into();
        let attn_bias = matches.get_flag(ATTN_BIAS);
        let batch_size = matches
            .get_one::<String>(BATCH_SIZE)
            .unwrap()
            .parse()
            .context("Cannot parse batch size")?;
        let device = match matches.get_one::<String>(GPU) {
            Some(gpu) => Device::Cuda(
                gpu.parse()
                    .context(format!("Cannot parse GPU number ({})", gpu))?,
            ),
            None => Device::Cpu,
        };
        let seed = matches
            .get_one::<String>(SEED)
            .unwrap()
            .parse()
            .context("Cannot parse seed")?;
        let seq_len = matches
            .get_one::<String>(SEQ_LEN)
            .unwrap()
            .parse()
            .context("Cannot parse sequence length")?;
        let train = matches.get_flag(TRAIN);

        Ok(ForwardApp {
            attn_bias,
            batch_size,
            config,
            device,
            seed,
            seq_len,
            train,
        })
    }

    fn run(&self) -> Result<()> {
        let config = self.load_config()?;

        let vs = VarStore::new(self.device);
        let layer = GraphEncoderLayerBuilder::new(&config)
            .init_fn(|| tch::manual_seed(self.seed))
            .build(vs.root())
            .context("Cannot construct encoder layer")?;

        let input = Tensor::randn(
            [self.seq_len, self.batch_size, config.embedding_dim],
            (Kind::Float, self.device),
        );
        let attn_bias = if self.attn_bias {
            Some(Tensor::randn(
                [
                    self.batch_size,
                    config.num_attention_heads,
                    self.seq_len,
                    self.seq_len,
                ],
                (Kind::Float, self.device),
            ))
        } else {
            None
        };

        let start = Instant::now();
        let output = tch::no_grad(|| {
            layer.forward_t(&input, attn_bias.as_ref(), None, None, self.train)
        })
        .context("Cannot apply encoder layer")?
        .output;
        log::info!(
            "Applied {}-norm layer to {}x{} input in {:.1}ms",
            if layer.pre_layernorm() { "pre" } else { "post" },
            self.seq_len,
            self.batch_size,
            start.elapsed().as_secs_f64() * 1000.
        );

        println!("shape: {:?}", output.size());
        println!(
            "mean: {:.6}",
            output.f_mean(Kind::Float)?.f_double_value(&[])?
        );
        println!("std: {:.6}", output.f_std(true)?.f_double_value(&[])?);

        Ok(())
    }
}
