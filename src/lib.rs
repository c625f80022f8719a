//! Orgelwerk is the brain of a multi-division organ console. Sub-controller boards scan
//! the keyboards, pedalboard and pistons; this crate takes their already-framed events,
//! merges them into MIDI, applies inter-division couplers and octave transposition, and
//! drives external tone generators through a routing abstraction. "Coupling" a division
//! (say, Choir to Pedal) makes every note played on the source also sound on the target,
//! possibly an octave away, without ever producing duplicate or stuck notes when several
//! sources land on the same note at once.
//!
//! The crate is architecture-agnostic and `no_std`: it contains no transport, scanning or
//! storage code. A firmware binary owns a [`engine::CouplingEngine`] and a
//! [`piston::PistonDispatcher`], polls its transports, and feeds complete events into the
//! two entry points ([`engine::CouplingEngine::route_input`] and
//! [`piston::PistonDispatcher::process_piston_press`]). Every operation is a finite,
//! synchronous state transition over fixed-size tables, so the core needs no locking and
//! never blocks.

#![deny(missing_docs)]
#![no_std]

// This mod MUST go first, so that the others see its macros.
mod fmt;

pub mod coupler;
pub mod division;
pub mod engine;
pub mod piston;
pub mod routing;
