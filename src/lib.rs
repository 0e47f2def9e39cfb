//! # resume-rag
//!
//! A local-first retrieval layer for a job-search assistant. An uploaded
//! resume (plain text, PDF, or DOCX) is turned into a searchable knowledge
//! base whose nearest chunks ground the assistant's answers.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────┐   ┌──────────┐   ┌────────────┐
//! │ knowledge_ │──▶│ loader  │──▶│  chunk   │──▶│ embedding  │
//! │ base/ dir  │   │ txt/pdf │   │ 300 words│   │ MiniLM/hash│
//! └────────────┘   └─────────┘   └──────────┘   └─────┬──────┘
//!                                                     ▼
//!                  ┌──────────────────┐         ┌────────────┐
//!   query text ──▶ │ KnowledgeBase    │◀───────▶│ FlatIndex  │
//!                  │ rebuild / query  │         │ + chunks   │──▶ disk
//!                  └──────────────────┘         └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rrag upload ./jane_doe.pdf          # replace the knowledge base and rebuild
//! rrag query "kubernetes experience"  # nearest chunks with distances
//! rrag context "leadership" --top-k 3 # grounding text for a prompt
//! rrag info                           # index status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`loader`] | Text extraction per file format |
//! | [`chunk`] | Word-bounded chunking |
//! | [`embedding`] | Embedding providers and vector helpers |
//! | [`index`] | Flat L2 nearest-neighbor index |
//! | [`store`] | Chunk store and paired persistence |
//! | [`knowledge`] | Rebuild / query lifecycle |

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod index;
pub mod knowledge;
pub mod loader;
pub mod models;
pub mod store;
