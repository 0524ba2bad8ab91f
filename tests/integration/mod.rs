mod support;

mod pipeline_flow;
mod resilience;
