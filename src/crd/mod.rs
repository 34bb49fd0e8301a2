//! Custom Resource Definitions consumed by the stack
//!
//! Only the shapes this crate submits are modelled; the controllers that act
//! on them run in the cluster.

mod helm_chart;

pub use helm_chart::{HelmChart, HelmChartSpec};
