pub mod claim_verifier_service;
pub mod evidence_hash_service;
pub mod executor_service;
pub mod notification_service;
pub mod operator_auth_service;
pub mod orchestrator_service;
pub mod policy_engine_service;
pub mod policy_rules_service;
pub mod reputation_service;
pub mod settlement_service;
pub mod validation_service;
