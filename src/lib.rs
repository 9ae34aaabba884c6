//! Five-party secure computation over replicated secret shares, specialised for the inference
//! of small fixed-point neural networks.
//!
//! Every value is split among five parties so that each party misses exactly one of the five
//! mask components. Any two parties together learn nothing about the value, and every message
//! a party needs is sent by three different parties, so that a single party sending wrong values
//! is outvoted.
//!
//! ## Main Components
//!
//! * [`share`] and [`ring`]: replicated and additive shares over `Z_2^64` and `GF(2)`.
//! * [`prf`]: the AES-based PRF from which all parties derive common masks without talking.
//! * [`channel`]: the [`channel::Transport`] contract and an in-process network for tests.
//! * [`net`]: a TCP transport with message batching, for running parties as processes.
//! * [`node`]: the per-task share store of a party.
//! * [`protocol`]: sharing, multiplication, dot products, truncation, bit decomposition, ReLU
//!   and reconstruction.
//! * [`fcnn`]: model loading, the plaintext reference and the inference engine.
//!
//! ## Example
//!
//! ```
//! use quintet::{
//!     protocol::{mul::multiply, reconstruction::open, sharing::share, simulate},
//!     ring::Z64,
//!     share::PartyId,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), quintet::protocol::Error> {
//! let results = simulate(7, |mut node| async move {
//!     if node.id() == PartyId::P1 {
//!         node.set_value(0, 6);
//!         node.set_value(1, 7);
//!     }
//!     let x = share::<Z64, _>(&mut node, PartyId::P1, 0).await?;
//!     let y = share::<Z64, _>(&mut node, PartyId::P1, 1).await?;
//!     let z = multiply::<Z64, _>(&mut node, &x, &y).await?;
//!     let informants = [PartyId::P1, PartyId::P2, PartyId::P3];
//!     open::<Z64, _>(&mut node, &z, informants, PartyId::P5).await
//! })
//! .await?;
//! assert_eq!(results[4], Some(42));
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Properties
//!
//! The protocols tolerate one actively corrupted party as far as the outputs are concerned:
//! every relayed value is received from three senders and decided by majority. They do not
//! detect or identify the cheating party.
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod channel;
pub mod conditions;
pub mod config;
pub mod fcnn;
pub mod net;
pub mod node;
pub mod prf;
pub mod protocol;
pub mod ring;
pub mod share;
