pub mod broker_handlers;
