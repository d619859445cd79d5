mod common;
mod cycle_detection;
mod dirty_propagation;
