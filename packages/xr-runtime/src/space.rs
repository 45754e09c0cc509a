//! Reference spaces.
//!
//! The camera is stationary, so VIEW, LOCAL, and STAGE are all the same
//! identity frame; a space is nothing more than its type tag attached to
//! a session.

use std::sync::Arc;

use crate::abi::{
    XrReferenceSpaceCreateInfo, XrReferenceSpaceType, XrResult, XrSession, XrSpace,
    XrStructureType,
};
use crate::runtime::{allocate_handle, lookup_session, SpaceData, SPACES};

/// Space types this runtime enumerates.
pub(crate) const SUPPORTED_SPACES: [XrReferenceSpaceType; 3] = [
    XrReferenceSpaceType::View,
    XrReferenceSpaceType::Local,
    XrReferenceSpaceType::Stage,
];

pub(crate) fn create_reference_space(
    session: XrSession,
    info: &XrReferenceSpaceCreateInfo,
    out: &mut XrSpace,
) -> XrResult {
    if info.ty != XrStructureType::ReferenceSpaceCreateInfo {
        return XrResult::ErrorValidationFailure;
    }
    if lookup_session(session).is_none() {
        return XrResult::ErrorHandleInvalid;
    }
    if !SUPPORTED_SPACES.contains(&info.reference_space_type) {
        return XrResult::ErrorReferenceSpaceUnsupported;
    }

    let handle = allocate_handle();
    SPACES.lock().unwrap().insert(
        handle,
        Arc::new(SpaceData {
            session,
            space_type: info.reference_space_type,
        }),
    );
    *out = handle;
    XrResult::Success
}

pub(crate) fn destroy_space(space: XrSpace) -> XrResult {
    if SPACES.lock().unwrap().remove(&space).is_none() {
        return XrResult::ErrorHandleInvalid;
    }
    XrResult::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::XrPosef;
    use crate::runtime::lookup_space;
    use crate::session::test_support::{cleanup, create_test_session};

    fn space_info(ty: XrReferenceSpaceType) -> XrReferenceSpaceCreateInfo {
        XrReferenceSpaceCreateInfo {
            ty: XrStructureType::ReferenceSpaceCreateInfo,
            next: std::ptr::null(),
            reference_space_type: ty,
            pose_in_reference_space: XrPosef::IDENTITY,
        }
    }

    #[test]
    fn test_create_all_supported_spaces() {
        let (instance, session, _device) = create_test_session();
        for ty in SUPPORTED_SPACES {
            let mut space = 0;
            assert_eq!(
                create_reference_space(session, &space_info(ty), &mut space),
                XrResult::Success
            );
            let data = lookup_space(space).unwrap();
            assert_eq!(data.space_type, ty);
            assert_eq!(data.session, session);
            assert_eq!(destroy_space(space), XrResult::Success);
        }
        cleanup(instance, session);
    }

    #[test]
    fn test_unsupported_space_type() {
        let (instance, session, _device) = create_test_session();
        let mut space = 0;
        assert_eq!(
            create_reference_space(
                session,
                &space_info(XrReferenceSpaceType::LocalFloor),
                &mut space
            ),
            XrResult::ErrorReferenceSpaceUnsupported
        );
        cleanup(instance, session);
    }

    #[test]
    fn test_destroy_unknown_space() {
        assert_eq!(destroy_space(0xBEEF), XrResult::ErrorHandleInvalid);
    }

    #[test]
    fn test_create_space_on_dead_session() {
        let mut space = 0;
        assert_eq!(
            create_reference_space(
                0xDEAD,
                &space_info(XrReferenceSpaceType::Local),
                &mut space
            ),
            XrResult::ErrorHandleInvalid
        );
    }
}
