//! Department management: `civic department`.

use anyhow::{Result, bail};
use civic_report::config::CivicToml;
use civic_report::portal::models::NewDepartment;

use super::super::DepartmentCommands;

pub fn cmd_department(config: &CivicToml, command: DepartmentCommands) -> Result<()> {
    let db = super::open_db(config)?;

    match command {
        DepartmentCommands::Add {
            name,
            description,
            contact_email,
            contact_phone,
        } => {
            let name = name.trim().to_string();
            if name.is_empty() {
                bail!("Department name must not be empty");
            }
            if db.find_department(&name)?.is_some() {
                bail!("Department '{}' already exists", name);
            }
            let dept = db.create_department(&NewDepartment {
                name,
                description,
                contact_email,
                contact_phone,
            })?;
            println!("Added department {} (id {})", dept.name, dept.id);
        }
        DepartmentCommands::List => {
            for dept in db.list_departments()? {
                match &dept.contact_email {
                    Some(email) => println!("{:>3}  {:<24} {}", dept.id, dept.name, email),
                    None => println!("{:>3}  {}", dept.id, dept.name),
                }
            }
        }
    }

    Ok(())
}
