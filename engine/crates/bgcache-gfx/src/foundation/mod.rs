pub mod queue_family;
