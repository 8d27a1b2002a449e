pub mod broker_service;
