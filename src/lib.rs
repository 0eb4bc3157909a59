pub mod annotation;
pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod fasta;
pub mod features;
pub mod homolog;
pub mod output;
pub mod pipeline;
pub mod promoter;
pub mod resolver;
pub mod retry;
pub mod sequence;
pub mod transcript;
pub mod translate;
pub mod wheatomics;
pub mod window;
