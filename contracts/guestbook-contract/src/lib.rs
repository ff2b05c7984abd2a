#[cfg(feature = "contract")]
mod contract_impl {
    use freenet_stdlib::prelude::*;
    use guestbook_common::guestbook::{GuestbookState, GuestbookSummary};

    pub struct Contract;

    fn decode_state(bytes: &[u8]) -> Result<GuestbookState, ContractError> {
        if bytes.is_empty() {
            return Ok(GuestbookState::default());
        }
        serde_json::from_slice(bytes).map_err(|e| ContractError::Deser(e.to_string()))
    }

    /// Append an incoming state or delta. Anything that would break the
    /// ledger's invariants is rejected as a whole.
    fn append_validated(guestbook: &mut GuestbookState, bytes: &[u8]) -> Result<(), ContractError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let update = decode_state(bytes)?;
        if !update.validate() {
            return Err(ContractError::InvalidUpdate);
        }
        guestbook.merge(update);
        Ok(())
    }

    #[contract]
    impl ContractInterface for Contract {
        fn validate_state(
            _parameters: Parameters<'static>,
            state: State<'static>,
            _related: RelatedContracts<'static>,
        ) -> Result<ValidateResult, ContractError> {
            let guestbook = decode_state(state.as_ref())?;
            if !guestbook.validate() {
                return Ok(ValidateResult::Invalid);
            }
            Ok(ValidateResult::Valid)
        }

        fn update_state(
            _parameters: Parameters<'static>,
            state: State<'static>,
            data: Vec<UpdateData<'static>>,
        ) -> Result<UpdateModification<'static>, ContractError> {
            let mut guestbook = decode_state(state.as_ref())?;

            for ud in data {
                match ud {
                    UpdateData::State(s) => {
                        append_validated(&mut guestbook, s.as_ref())?;
                    }
                    UpdateData::Delta(d) => {
                        append_validated(&mut guestbook, d.as_ref())?;
                    }
                    UpdateData::StateAndDelta { state, delta } => {
                        append_validated(&mut guestbook, state.as_ref())?;
                        append_validated(&mut guestbook, delta.as_ref())?;
                    }
                    _ => return Err(ContractError::InvalidUpdate),
                }
            }

            let serialized =
                serde_json::to_vec(&guestbook).map_err(|e| ContractError::Other(e.to_string()))?;
            Ok(UpdateModification::valid(State::from(serialized)))
        }

        fn summarize_state(
            _parameters: Parameters<'static>,
            state: State<'static>,
        ) -> Result<StateSummary<'static>, ContractError> {
            if state.is_empty() {
                return Ok(StateSummary::from(vec![]));
            }

            let summary = decode_state(state.as_ref())?.summarize();
            let serialized =
                serde_json::to_vec(&summary).map_err(|e| ContractError::Other(e.to_string()))?;
            Ok(StateSummary::from(serialized))
        }

        fn get_state_delta(
            _parameters: Parameters<'static>,
            state: State<'static>,
            summary: StateSummary<'static>,
        ) -> Result<StateDelta<'static>, ContractError> {
            if state.is_empty() {
                return Ok(StateDelta::from(vec![]));
            }

            let guestbook = decode_state(state.as_ref())?;
            let summary: GuestbookSummary = if summary.is_empty() {
                GuestbookSummary::default()
            } else {
                serde_json::from_slice(summary.as_ref())
                    .map_err(|e| ContractError::Deser(e.to_string()))?
            };

            let delta = guestbook.delta(&summary);
            let serialized =
                serde_json::to_vec(&delta).map_err(|e| ContractError::Other(e.to_string()))?;
            Ok(StateDelta::from(serialized))
        }
    }
}
