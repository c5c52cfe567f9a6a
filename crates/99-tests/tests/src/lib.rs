//! Cross-crate tests for the endpoint simulator.

#[cfg(test)]
mod support;

#[cfg(test)]
mod scenario;

#[cfg(test)]
mod determinism;

#[cfg(test)]
mod compat;

#[cfg(test)]
mod link_e2e;

#[cfg(test)]
mod lifecycle_stress;

#[cfg(test)]
mod abi_roundtrip;
