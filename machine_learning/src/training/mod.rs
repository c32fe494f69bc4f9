mod builder;
mod trainer;

pub use builder::TrainerBuilder;
pub use trainer::Trainer;
