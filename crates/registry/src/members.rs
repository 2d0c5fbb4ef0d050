use std::time::Duration;

use objscope_channel::layout::{
	IVAR_ENTRY_SIZE, IvarEntry, MEMBER_TABLE_SIZE, METHOD_ENTRY_SIZE, MemberTable, MethodEntry, PROPERTY_ENTRY_SIZE,
	PropertyEntry, read_aggregate, read_array, read_string,
};
use objscope_channel::{AccessChannel, ChannelError, EvalOptions, Expr};
use objscope_matcher::Pattern;
use objscope_primitives::{EntityHandle, IvarInfo, Members, MethodInfo, PropertyInfo};

/// Fetches the member table of `handle`: one evaluate, then memory reads.
pub fn fetch_members<C>(channel: &C, handle: EntityHandle, timeout: Duration) -> Result<Members, ChannelError>
where
	C: AccessChannel + ?Sized,
{
	let value = channel.evaluate(&Expr::MemberTable { handle }, EvalOptions::with_timeout(timeout))?;
	let (count, bytes) = read_aggregate(channel, value, MEMBER_TABLE_SIZE)?;
	if count == 0 || bytes.len() < MEMBER_TABLE_SIZE {
		return Err(ChannelError::UnexpectedValue(format!("empty member table for {handle}")));
	}
	let table = MemberTable::decode(&bytes[..MEMBER_TABLE_SIZE]);

	let instance_count = usize::from(table.method_count);
	let total_methods = instance_count + usize::from(table.class_method_count);
	let mut methods = Vec::with_capacity(total_methods);
	let raw = read_array(channel, table.methods, total_methods, METHOD_ENTRY_SIZE)?;
	for chunk in raw.chunks_exact(METHOD_ENTRY_SIZE) {
		let entry = MethodEntry::decode(chunk);
		methods.push(MethodInfo {
			selector: read_string(channel, entry.selector)?,
			type_encoding: read_string(channel, entry.types)?,
			imp: entry.imp,
		});
	}
	let class_methods = methods.split_off(instance_count.min(methods.len()));

	let raw = read_array(channel, table.ivars, usize::from(table.ivar_count), IVAR_ENTRY_SIZE)?;
	let mut ivars = Vec::with_capacity(usize::from(table.ivar_count));
	for chunk in raw.chunks_exact(IVAR_ENTRY_SIZE) {
		let entry = IvarEntry::decode(chunk);
		ivars.push(IvarInfo {
			name: read_string(channel, entry.name)?,
			type_encoding: read_string(channel, entry.types)?,
			offset: entry.offset,
		});
	}

	let raw = read_array(channel, table.properties, usize::from(table.property_count), PROPERTY_ENTRY_SIZE)?;
	let mut properties = Vec::with_capacity(usize::from(table.property_count));
	for chunk in raw.chunks_exact(PROPERTY_ENTRY_SIZE) {
		let entry = PropertyEntry::decode(chunk);
		properties.push(PropertyInfo {
			name: read_string(channel, entry.name)?,
			attributes: read_string(channel, entry.attributes)?,
		});
	}

	tracing::trace!(
		%handle,
		methods = methods.len(),
		class_methods = class_methods.len(),
		ivars = ivars.len(),
		properties = properties.len(),
		"fetched members"
	);
	Ok(Members {
		methods,
		class_methods,
		ivars,
		properties,
	})
}

/// Members whose selector or name matches `pattern`.
pub fn filter_members(members: &Members, pattern: &Pattern) -> Members {
	let methods = |list: &[MethodInfo]| -> Vec<MethodInfo> {
		list.iter().filter(|m| pattern.matches(&m.selector)).cloned().collect()
	};
	Members {
		methods: methods(&members.methods),
		class_methods: methods(&members.class_methods),
		ivars: members.ivars.iter().filter(|i| pattern.matches(&i.name)).cloned().collect(),
		properties: members
			.properties
			.iter()
			.filter(|p| pattern.matches(&p.name))
			.cloned()
			.collect(),
	}
}

#[cfg(test)]
mod tests {
	use objscope_channel::sim::{SimRuntime, SimTarget};
	use objscope_matcher::{MatchMode, compile_with};
	use pretty_assertions::assert_eq;

	use super::*;

	fn fetch(target: &SimTarget, name: &str) -> Members {
		let handle = EntityHandle::new(target.handle_of(name).unwrap()).unwrap();
		fetch_members(target, handle, Duration::from_secs(1)).unwrap()
	}

	#[test]
	fn splits_instance_and_class_methods() {
		let target = SimTarget::new(SimRuntime::foundation(), 1);
		let members = fetch(&target, "NSString");
		let selectors: Vec<_> = members.methods.iter().map(|m| m.selector.as_str()).collect();
		assert_eq!(selectors, ["length", "stringValue", "characterAtIndex:"]);
		assert_eq!(members.class_methods.len(), 1);
		assert_eq!(members.class_methods[0].selector, "stringWithFormat:");
		assert_eq!(members.properties[0].attributes, "TQ,R,N");
		assert!(members.methods.iter().all(|m| m.imp != 0));
	}

	#[test]
	fn reads_ivars() {
		let target = SimTarget::new(SimRuntime::foundation(), 1);
		let members = fetch(&target, "IDSService");
		assert_eq!(
			members.ivars,
			vec![IvarInfo {
				name: "_serviceIdentifier".into(),
				type_encoding: "@\"NSString\"".into(),
				offset: 8,
			}]
		);
	}

	#[test]
	fn unknown_handle_fails() {
		let target = SimTarget::new(SimRuntime::foundation(), 1);
		let err = fetch_members(&target, EntityHandle::new(0xbad0).unwrap(), Duration::from_secs(1)).unwrap_err();
		assert!(matches!(err, ChannelError::Evaluation(_)));
	}

	#[test]
	fn filter_matches_every_member_kind() {
		let target = SimTarget::new(SimRuntime::foundation(), 1);
		let members = fetch(&target, "IDSService");
		let found = filter_members(&members, &compile_with("service", MatchMode::Member));
		let selectors: Vec<_> = found.methods.iter().map(|m| m.selector.as_str()).collect();
		assert_eq!(selectors, ["serviceIdentifier", "_initWithService:"]);
		assert_eq!(found.ivars.len(), 1);
		assert_eq!(found.properties.len(), 1);

		let found = filter_members(&members, &compile_with("_init*", MatchMode::Member));
		assert_eq!(found.len(), 1);
	}
}
